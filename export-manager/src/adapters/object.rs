use super::{join_path, storage_config};
use super::transport::{ObjectTarget, ObjectTransport};
use crate::adapter::{ExportAdapter, ExportJob, ExportOutcome, Payload};
use async_trait::async_trait;
use dataport::destination::{StorageConfig, StorageType};
use dataport::{DestinationError, Result};
use std::sync::Arc;
use tracing::debug;

/// Adapter for S3, FTP and SFTP destinations.
///
/// Computes the object key or remote path and leaves the wire protocol to
/// the injected [`ObjectTransport`].
pub struct ObjectAdapter {
    storage_type: StorageType,
    transport: Arc<dyn ObjectTransport>,
}

impl ObjectAdapter {
    pub fn new(storage_type: StorageType, transport: Arc<dyn ObjectTransport>) -> Self {
        Self {
            storage_type,
            transport,
        }
    }

    pub fn target(config: &StorageConfig, file_name: &str) -> Result<ObjectTarget> {
        match config {
            StorageConfig::S3(c) => Ok(ObjectTarget {
                scheme: "s3".to_string(),
                authority: c.bucket.clone(),
                path: join_path(&[c.prefix.as_deref().unwrap_or(""), file_name]),
            }),
            StorageConfig::FileTransfer(c) => Ok(ObjectTarget {
                scheme: c.protocol.clone(),
                authority: format!("{}:{}", c.host, c.port),
                path: join_path(&[c.remote_path.as_deref().unwrap_or(""), file_name]),
            }),
            _ => Err(DestinationError::InvalidInput(
                "Object transport requires an S3 or file transfer config".to_string(),
            )),
        }
    }

    async fn deliver(&self, job: &ExportJob, payload: &Payload) -> Result<ExportOutcome> {
        let config = storage_config(job, self.storage_type)?;
        let target = Self::target(&config, &job.file_name)?;
        debug!(export_id = %job.export_id, target = %target.url(), "Handing export to object transport");

        let written = self.transport.put(&target, &config, &payload.bytes).await?;
        Ok(ExportOutcome::success(target.url(), written))
    }
}

#[async_trait]
impl ExportAdapter for ObjectAdapter {
    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    async fn export(&self, job: &ExportJob, payload: &Payload) -> ExportOutcome {
        ExportOutcome::from_result(self.deliver(job, payload).await)
    }
}
