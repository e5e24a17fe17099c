//! Delivers the payload to a user-supplied HTTP endpoint.

use super::{check_status, join_path, storage_config, transport_error};
use crate::adapter::{ExportAdapter, ExportJob, ExportOutcome, Payload};
use async_trait::async_trait;
use dataport::destination::{CustomApiConfig, StorageConfig, StorageType};
use dataport::{DestinationError, Result};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::debug;

pub struct CustomApiAdapter {
    client: reqwest::Client,
}

impl CustomApiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn upload(&self, job: &ExportJob, payload: &Payload) -> Result<ExportOutcome> {
        let config = match storage_config(job, StorageType::CustomApi)? {
            StorageConfig::CustomApi(config) => config,
            _ => return Err(DestinationError::InvalidInput("Expected a custom API config".to_string())),
        };
        let url = endpoint_url(&config);
        debug!(export_id = %job.export_id, url = %url, "Posting export to custom API");

        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, payload.content_type())
            .header("X-Export-Id", job.export_id.as_str())
            .header("X-File-Name", job.file_name.as_str())
            .body(payload.bytes.clone());

        if let Some(api_key) = &config.api_key {
            request = match &config.api_key_header {
                Some(header) => request.header(header.as_str(), api_key.expose().as_str()),
                None => request.bearer_auth(api_key.expose()),
            };
        }

        let response = request.send().await.map_err(transport_error)?;
        let response = check_status(response, &url).await?;

        // The receiver may report where it stored the file
        let body: Option<Value> = response.json().await.ok();
        let file_url = body
            .as_ref()
            .and_then(|b| b.get("url").or_else(|| b.get("file_url")))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(url);

        Ok(ExportOutcome::success(file_url, payload.size()))
    }
}

fn endpoint_url(config: &CustomApiConfig) -> String {
    match config.endpoint.as_deref() {
        Some(endpoint) => format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            join_path(&[endpoint])
        ),
        None => config.base_url.clone(),
    }
}

#[async_trait]
impl ExportAdapter for CustomApiAdapter {
    fn storage_type(&self) -> StorageType {
        StorageType::CustomApi
    }

    async fn export(&self, job: &ExportJob, payload: &Payload) -> ExportOutcome {
        ExportOutcome::from_result(self.upload(job, payload).await)
    }
}
