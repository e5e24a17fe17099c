//! Export orchestrator - accepts export requests and runs them in the
//! background.
//!
//! `Requested → InProgress → (Success | Failed)`. The request path only
//! checks the destination, creates the export log and hands the work to the
//! [`TaskSupervisor`]. The background task writes exactly one terminal update;
//! transport failures are recorded on the export log, never returned to the
//! caller.

use crate::adapter::{ExportAdapter, ExportJob, ExportOutcome, Payload};
use crate::registry::AdapterRegistry;
use crate::render::{self, DatasetSource};
use crate::supervisor::{ShutdownReport, TaskSupervisor};
use chrono::Utc;
use dataport::activity::{self, AuditSink, NewActivity};
use dataport::destination::{DestinationStatus, LifecycleManager};
use dataport::export_log::{ExportLog, ExportLogStore, ExportStatus};
use dataport::{DestinationError, RequestContext, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{error, info, warn, Instrument};

#[cfg(test)]
mod tests;

const ABORTED_BY_SHUTDOWN: &str = "Export aborted by shutdown";

/// Response to an accepted export request.
#[derive(Clone, Debug, Serialize)]
pub struct ExportRequested {
    pub export_id: String,
    pub status: ExportStatus,
}

#[derive(Clone)]
pub struct ExportOrchestrator {
    lifecycle: Arc<LifecycleManager>,
    logs: Arc<ExportLogStore>,
    registry: Arc<AdapterRegistry>,
    dataset: Arc<dyn DatasetSource>,
    audit: Arc<dyn AuditSink>,
    supervisor: Arc<TaskSupervisor>,
    running: Arc<Mutex<HashMap<String, RunningExport>>>,
}

/// Export handed to the supervisor and not yet finished.
#[derive(Clone)]
struct RunningExport {
    ctx: RequestContext,
    destination_id: String,
}

impl ExportOrchestrator {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        logs: Arc<ExportLogStore>,
        registry: Arc<AdapterRegistry>,
        dataset: Arc<dyn DatasetSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            lifecycle,
            logs,
            registry,
            dataset,
            audit,
            supervisor: Arc::new(TaskSupervisor::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Accepts an export and returns without waiting for delivery.
    pub async fn request_export(&self, ctx: &RequestContext, destination_id: &str) -> Result<ExportRequested> {
        async {
            let destination = match self.lifecycle.get(ctx, destination_id).await {
                Ok(destination) => destination,
                Err(e) => return Err(self.fail(ctx, destination_id, e)),
            };
            if destination.is_deleted {
                return Err(self.fail(
                    ctx,
                    destination_id,
                    DestinationError::PreconditionFailed(format!(
                        "Destination {} is deleted; restore it before exporting",
                        destination_id
                    )),
                ));
            }

            let log = self
                .logs
                .create(&destination.id, &ctx.owner_id, &ctx.correlation_id)
                .map_err(|e| self.fail(ctx, destination_id, e.into()))?;

            let this = self.clone();
            let task_ctx = ctx.clone();
            let export_id = log.id.clone();
            let task_destination_id = destination.id.clone();
            self.running().insert(
                log.id.clone(),
                RunningExport {
                    ctx: ctx.clone(),
                    destination_id: destination.id.clone(),
                },
            );
            let spawned = self.supervisor.spawn(
                async move {
                    this.run_export(&task_ctx, &export_id, &task_destination_id).await;
                }
                .instrument(ctx.span("export_run")),
            );

            if let Err(closed) = spawned {
                self.running().remove(&log.id);
                // The log must not stay InProgress when nothing will run it
                if let Err(e) = self.logs.complete_failure(&log.id, &closed.to_string()) {
                    error!(export_id = %log.id, error = %e, "Failed to close export log");
                }
                return Err(self.fail(
                    ctx,
                    destination_id,
                    DestinationError::PreconditionFailed(closed.to_string()),
                ));
            }

            info!(
                export_id = %log.id,
                destination_id = %destination.id,
                storage_type = destination.storage_type.as_str(),
                "Export requested"
            );
            self.audit(
                NewActivity::new(ctx, "export_requested", format!("Export requested for {}", destination.name))
                    .destination(&destination.id)
                    .details(json!({
                        "export_id": log.id,
                        "storage_type": destination.storage_type.as_str(),
                        "export_format": destination.export_format.as_str(),
                    })),
            );

            Ok(ExportRequested {
                export_id: log.id,
                status: ExportStatus::InProgress,
            })
        }
        .instrument(ctx.span("export_request"))
        .await
    }

    /// Export log owned by the caller.
    pub async fn get_export(&self, ctx: &RequestContext, export_id: &str) -> Result<ExportLog> {
        self.logs
            .get_owned(export_id, &ctx.owner_id)?
            .ok_or_else(|| DestinationError::NotFound(format!("Export {} not found", export_id)))
    }

    /// Export history of a destination owned by the caller, newest first.
    pub async fn list_exports(&self, ctx: &RequestContext, destination_id: &str) -> Result<Vec<ExportLog>> {
        self.lifecycle.get(ctx, destination_id).await?;
        Ok(self.logs.list_by_destination(destination_id, &ctx.owner_id)?)
    }

    /// Exports accepted and still running.
    pub fn in_flight(&self) -> usize {
        self.supervisor.active()
    }

    /// Stops accepting exports and drains running ones. Exports aborted at
    /// the deadline are closed as failed.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let report = self.supervisor.shutdown(timeout).await;

        let aborted: Vec<(String, RunningExport)> = self.running().drain().collect();
        for (export_id, export) in aborted {
            match self.logs.complete_failure(&export_id, ABORTED_BY_SHUTDOWN) {
                Ok(true) => {
                    warn!(export_id = %export_id, "Export aborted by shutdown");
                    self.audit(
                        NewActivity::new(&export.ctx, "export_failed", ABORTED_BY_SHUTDOWN)
                            .destination(&export.destination_id)
                            .details(json!({ "export_id": export_id, "error": ABORTED_BY_SHUTDOWN })),
                    );
                }
                Ok(false) => {}
                Err(e) => error!(export_id = %export_id, error = %e, "Failed to close aborted export log"),
            }
        }

        info!(completed = report.completed, aborted = report.aborted, "Export orchestrator stopped");
        report
    }

    async fn run_export(&self, ctx: &RequestContext, export_id: &str, destination_id: &str) {
        let outcome = match self.prepare(ctx, export_id, destination_id).await {
            Ok((adapter, job, payload)) => execute(adapter, job, payload).await,
            Err(e) => ExportOutcome::failure(format!("{:#}", e)),
        };
        self.finish(ctx, export_id, destination_id, outcome).await;
        self.running().remove(export_id);
    }

    fn running(&self) -> MutexGuard<'_, HashMap<String, RunningExport>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reads the destination as it is now and renders the payload.
    async fn prepare(
        &self,
        ctx: &RequestContext,
        export_id: &str,
        destination_id: &str,
    ) -> anyhow::Result<(Arc<dyn ExportAdapter>, ExportJob, Payload)> {
        let destination = self.lifecycle.get(ctx, destination_id).await?;
        if destination.is_deleted {
            anyhow::bail!("Destination {} was deleted before the export started", destination_id);
        }

        let adapter = self.registry.resolve(destination.storage_type)?;
        let token = self
            .registry
            .token_for(&destination.user_id, destination.storage_type)?;
        let rows = self.dataset.rows(&destination).await?;
        let payload = render::render(&rows, destination.export_format)?;
        let file_name = render::file_name(&destination, export_id, Utc::now());

        Ok((
            adapter,
            ExportJob {
                export_id: export_id.to_string(),
                destination,
                token,
                file_name,
            },
            payload,
        ))
    }

    async fn finish(&self, ctx: &RequestContext, export_id: &str, destination_id: &str, outcome: ExportOutcome) {
        let written = if outcome.success {
            self.logs
                .complete_success(export_id, outcome.file_url.as_deref(), outcome.file_size)
        } else {
            self.logs
                .complete_failure(export_id, outcome.error.as_deref().unwrap_or("Export failed"))
        };

        match written {
            Ok(true) => {}
            Ok(false) => {
                warn!(export_id = %export_id, "Export log already terminal, result discarded");
                return;
            }
            Err(e) => error!(export_id = %export_id, error = %e, "Failed to record export result"),
        }

        if outcome.success {
            info!(export_id = %export_id, file_url = ?outcome.file_url, "Export completed");
            if let Err(e) = self
                .lifecycle
                .record_status(destination_id, DestinationStatus::Active)
                .await
            {
                warn!(destination_id = %destination_id, error = %e, "Failed to mark destination active");
            }
            self.audit(
                NewActivity::new(ctx, "export_completed", "Export completed")
                    .destination(destination_id)
                    .details(json!({
                        "export_id": export_id,
                        "file_url": outcome.file_url,
                        "file_size": outcome.file_size,
                    })),
            );
        } else {
            let message = outcome.error.unwrap_or_else(|| "Export failed".to_string());
            warn!(export_id = %export_id, error = %message, "Export failed");
            self.audit(
                NewActivity::new(ctx, "export_failed", message.clone())
                    .destination(destination_id)
                    .details(json!({ "export_id": export_id, "error": message })),
            );
        }
    }

    fn audit(&self, entry: NewActivity) {
        activity::record(self.audit.as_ref(), entry);
    }

    fn fail(&self, ctx: &RequestContext, destination_id: &str, error: DestinationError) -> DestinationError {
        warn!(destination_id = %destination_id, error = %error, "Export request rejected");
        self.audit(
            NewActivity::new(ctx, "export_request_error", error.to_string())
                .destination(destination_id)
                .details(json!({ "kind": error.kind() })),
        );
        error
    }
}

/// Aborts the adapter task when the export task is dropped, so an export
/// aborted at shutdown does not leave its upload running.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs the adapter on its own task so a panic inside it still ends in a
/// terminal export log.
async fn execute(adapter: Arc<dyn ExportAdapter>, job: ExportJob, payload: Payload) -> ExportOutcome {
    let export_id = job.export_id.clone();
    let handle = tokio::spawn(async move { adapter.export(&job, &payload).await });
    let _guard = AbortOnDrop(handle.abort_handle());
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            error!(export_id = %export_id, "Export adapter panicked");
            ExportOutcome::failure("Export adapter panicked")
        }
        Err(e) => ExportOutcome::failure(format!("Export adapter task ended unexpectedly: {}", e)),
    }
}
