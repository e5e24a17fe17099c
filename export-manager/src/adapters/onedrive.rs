//! OneDrive simple upload through Microsoft Graph.

use super::{bearer_token, check_status, join_path, storage_config, transport_error};
use crate::adapter::{ExportAdapter, ExportJob, ExportOutcome, Payload};
use async_trait::async_trait;
use dataport::destination::{StorageConfig, StorageType};
use dataport::{DestinationError, Result};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct DriveItem {
    #[serde(rename = "webUrl")]
    web_url: Option<String>,
    size: Option<u64>,
}

pub struct OneDriveAdapter {
    client: reqwest::Client,
    /// `https://graph.microsoft.com/v1.0` outside tests
    graph_base: String,
}

impl OneDriveAdapter {
    pub fn new(client: reqwest::Client, graph_base: impl Into<String>) -> Self {
        Self {
            client,
            graph_base: graph_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn item_path(folder_path: Option<&str>, file_name: &str) -> String {
        join_path(&[folder_path.unwrap_or(""), file_name])
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    async fn upload(&self, job: &ExportJob, payload: &Payload) -> Result<ExportOutcome> {
        let folder_path = match storage_config(job, StorageType::OneDrive)? {
            StorageConfig::Drive(config) => config.folder_path,
            _ => None,
        };
        let access_token = bearer_token(job, StorageType::OneDrive)?;

        let url = format!(
            "{}/me/drive/root:/{}:/content",
            self.graph_base,
            Self::item_path(folder_path.as_deref(), &job.file_name)
        );
        debug!(export_id = %job.export_id, "Uploading export to OneDrive");

        let response = self
            .client
            .put(&url)
            .bearer_auth(&access_token)
            .header(CONTENT_TYPE, payload.content_type())
            .body(payload.bytes.clone())
            .send()
            .await
            .map_err(transport_error)?;
        let item: DriveItem = check_status(response, "OneDrive upload")
            .await?
            .json()
            .await
            .map_err(|e| DestinationError::Transport(format!("Invalid OneDrive response: {}", e)))?;

        let file_url = item.web_url.ok_or_else(|| {
            DestinationError::Transport("OneDrive response did not include webUrl".to_string())
        })?;
        Ok(ExportOutcome::success(file_url, item.size.unwrap_or_else(|| payload.size())))
    }
}

#[async_trait]
impl ExportAdapter for OneDriveAdapter {
    fn storage_type(&self) -> StorageType {
        StorageType::OneDrive
    }

    async fn export(&self, job: &ExportJob, payload: &Payload) -> ExportOutcome {
        ExportOutcome::from_result(self.upload(job, payload).await)
    }
}
