//! Append-only activity (audit) trail.
//!
//! Components receive an `Arc<dyn AuditSink>` at construction time instead of
//! reaching for a process-wide logger. Recording is best-effort: a failed
//! audit write is logged and swallowed so it never masks the real outcome.

mod store;

pub use store::ActivityLog;

use crate::context::RequestContext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// One audit record. Never updated or deleted once written.
#[derive(Clone, Debug, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub owner_id: String,
    pub destination_id: Option<String>,
    pub event_type: String,
    pub message: String,
    pub details: Option<Value>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

/// Audit record before it has been assigned an id and timestamp.
#[derive(Clone, Debug)]
pub struct NewActivity {
    pub owner_id: String,
    pub destination_id: Option<String>,
    pub event_type: String,
    pub message: String,
    pub details: Option<Value>,
    pub correlation_id: String,
}

impl NewActivity {
    pub fn new(ctx: &RequestContext, event_type: &str, message: impl Into<String>) -> Self {
        Self {
            owner_id: ctx.owner_id.clone(),
            destination_id: None,
            event_type: event_type.to_string(),
            message: message.into(),
            details: None,
            correlation_id: ctx.correlation_id.clone(),
        }
    }

    pub fn destination(mut self, destination_id: &str) -> Self {
        self.destination_id = Some(destination_id.to_string());
        self
    }

    /// Attaches structured details. Callers pass already-redacted values
    /// (typed configs whose credentials are `Secret`s).
    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: NewActivity) -> anyhow::Result<()>;
}

/// Appends an entry, logging instead of failing when the sink is unavailable.
pub fn record(sink: &dyn AuditSink, entry: NewActivity) {
    let event_type = entry.event_type.clone();
    let owner_id = entry.owner_id.clone();
    if let Err(e) = sink.append(entry) {
        warn!(
            event_type = %event_type,
            owner_id = %owner_id,
            error = %e,
            "Failed to write activity log entry"
        );
    }
}
