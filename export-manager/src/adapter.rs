use async_trait::async_trait;
use dataport::credentials::OAuthToken;
use dataport::destination::{Destination, ExportFormat, StorageType};
use dataport::DestinationError;

/// Rendered export file.
#[derive(Clone, Debug)]
pub struct Payload {
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

impl Payload {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Everything an adapter needs to deliver one export.
///
/// The destination is the copy read when the background task started.
#[derive(Clone, Debug)]
pub struct ExportJob {
    pub export_id: String,
    pub destination: Destination,
    /// Stored OAuth token for drive providers, `None` for other backends.
    pub token: Option<OAuthToken>,
    pub file_name: String,
}

/// Result of one delivery attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportOutcome {
    pub success: bool,
    pub file_url: Option<String>,
    pub file_size: Option<u64>,
    pub error: Option<String>,
}

impl ExportOutcome {
    pub fn success(file_url: impl Into<String>, file_size: u64) -> Self {
        Self {
            success: true,
            file_url: Some(file_url.into()),
            file_size: Some(file_size),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Folds an adapter's internal result into an outcome.
    pub fn from_result(result: Result<ExportOutcome, DestinationError>) -> Self {
        result.unwrap_or_else(|e| Self::failure(e.to_string()))
    }
}

/// Delivery backend for one storage type.
///
/// Implementations re-check the destination config with the same rules as
/// the connection validator and never return an error: every failure is
/// reported as `ExportOutcome { success: false, .. }`.
///
/// # Example
/// ```no_run
/// use async_trait::async_trait;
/// use dataport::destination::StorageType;
/// use export_manager::{ExportAdapter, ExportJob, ExportOutcome, Payload};
///
/// struct NullAdapter;
///
/// #[async_trait]
/// impl ExportAdapter for NullAdapter {
///     fn storage_type(&self) -> StorageType {
///         StorageType::CustomApi
///     }
///
///     async fn export(&self, job: &ExportJob, payload: &Payload) -> ExportOutcome {
///         ExportOutcome::success(format!("null://{}", job.file_name), payload.size())
///     }
/// }
/// ```
#[async_trait]
pub trait ExportAdapter: Send + Sync {
    /// Storage type this adapter is registered under.
    fn storage_type(&self) -> StorageType;

    async fn export(&self, job: &ExportJob, payload: &Payload) -> ExportOutcome;
}
