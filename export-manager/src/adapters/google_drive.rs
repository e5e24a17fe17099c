//! Google Drive upload: a media upload followed by a metadata update that
//! names the file and moves it into the configured folder.

use super::{bearer_token, check_status, storage_config, transport_error};
use crate::adapter::{ExportAdapter, ExportJob, ExportOutcome, Payload};
use async_trait::async_trait;
use dataport::destination::{StorageConfig, StorageType};
use dataport::{DestinationError, Result};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    #[serde(rename = "webViewLink")]
    web_view_link: Option<String>,
}

pub struct GoogleDriveAdapter {
    client: reqwest::Client,
    /// `https://www.googleapis.com` outside tests
    api_base: String,
}

impl GoogleDriveAdapter {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn upload(&self, job: &ExportJob, payload: &Payload) -> Result<ExportOutcome> {
        let folder_id = match storage_config(job, StorageType::GoogleDrive)? {
            StorageConfig::Drive(config) => config.folder_id,
            _ => None,
        };
        let access_token = bearer_token(job, StorageType::GoogleDrive)?;

        let upload_url = format!("{}/upload/drive/v3/files?uploadType=media", self.api_base);
        let response = self
            .client
            .post(&upload_url)
            .bearer_auth(&access_token)
            .header(CONTENT_TYPE, payload.content_type())
            .body(payload.bytes.clone())
            .send()
            .await
            .map_err(transport_error)?;
        let uploaded: DriveFile = check_status(response, "Drive upload")
            .await?
            .json()
            .await
            .map_err(|e| DestinationError::Transport(format!("Invalid Drive upload response: {}", e)))?;
        debug!(export_id = %job.export_id, file_id = %uploaded.id, "Drive media uploaded");

        let metadata_url = format!("{}/drive/v3/files/{}", self.api_base, uploaded.id);
        let mut query = vec![("fields", "id,webViewLink")];
        if let Some(folder_id) = folder_id.as_deref() {
            query.push(("addParents", folder_id));
        }
        let response = self
            .client
            .patch(&metadata_url)
            .bearer_auth(&access_token)
            .query(&query)
            .json(&json!({ "name": job.file_name }))
            .send()
            .await
            .map_err(transport_error)?;
        let updated: DriveFile = check_status(response, "Drive metadata update")
            .await?
            .json()
            .await
            .map_err(|e| DestinationError::Transport(format!("Invalid Drive metadata response: {}", e)))?;

        let file_url = updated
            .web_view_link
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", updated.id));
        Ok(ExportOutcome::success(file_url, payload.size()))
    }
}

#[async_trait]
impl ExportAdapter for GoogleDriveAdapter {
    fn storage_type(&self) -> StorageType {
        StorageType::GoogleDrive
    }

    async fn export(&self, job: &ExportJob, payload: &Payload) -> ExportOutcome {
        ExportOutcome::from_result(self.upload(job, payload).await)
    }
}
