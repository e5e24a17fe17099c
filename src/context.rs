//! Per-call context carried through every component.

use tracing::Span;
use uuid::Uuid;

/// Who is acting and which request the work belongs to.
///
/// Passed explicitly into the broker, validator, lifecycle manager and
/// orchestrator so that log lines and audit entries share one correlation id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub owner_id: String,
    pub correlation_id: String,
}

impl RequestContext {
    /// New context with a freshly generated correlation id.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_correlation_id(owner_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Tracing span tagged with owner and correlation id.
    pub fn span(&self, operation: &'static str) -> Span {
        tracing::info_span!(
            "dataport",
            operation = operation,
            owner_id = %self.owner_id,
            correlation_id = %self.correlation_id
        )
    }
}
