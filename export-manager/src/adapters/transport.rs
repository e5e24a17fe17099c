//! Byte transports behind the S3 / FTP / SFTP adapters.

use async_trait::async_trait;
use dataport::destination::StorageConfig;
use dataport::{DestinationError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where an object lands: `<scheme>://<authority>/<path>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectTarget {
    /// `s3`, `ftp` or `sftp`
    pub scheme: String,
    /// Bucket for S3, `host:port` for file transfer
    pub authority: String,
    /// Object key or remote path, without a leading slash
    pub path: String,
}

impl ObjectTarget {
    pub fn url(&self) -> String {
        format!("{}://{}/{}", self.scheme, self.authority, self.path)
    }
}

/// Moves bytes to an object store or file server.
///
/// `config` carries the credentials a wire client needs.
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    /// Writes the object and returns the number of bytes stored.
    async fn put(&self, target: &ObjectTarget, config: &StorageConfig, bytes: &[u8]) -> Result<u64>;
}

/// Writes objects to a local outbox at `<root>/<scheme>/<authority>/<path>`
/// for an external shipper to pick up.
pub struct SpoolTransport {
    root: PathBuf,
}

impl SpoolTransport {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Local file for a target. Path traversal segments are dropped.
    pub fn spool_path(&self, target: &ObjectTarget) -> PathBuf {
        let mut path = self.root.join(sanitize(&target.scheme)).join(sanitize(&target.authority));
        for segment in target.path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                continue;
            }
            path.push(sanitize(segment));
        }
        path
    }
}

fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[async_trait]
impl ObjectTransport for SpoolTransport {
    async fn put(&self, target: &ObjectTarget, _config: &StorageConfig, bytes: &[u8]) -> Result<u64> {
        let path = self.spool_path(target);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DestinationError::Transport(format!("Failed to create spool directory {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            DestinationError::Transport(format!("Failed to write spool file {}: {}", path.display(), e))
        })?;

        debug!(target = %target.url(), spool_path = %path.display(), bytes = bytes.len(), "Object spooled");
        Ok(bytes.len() as u64)
    }
}
