//! Destination lifecycle: create, edit, soft delete, restore, purge.
//!
//! Each mutation appends exactly one activity entry, success or `*_error`.

use super::{
    ConfigMap, Destination, DestinationStatus, DestinationStore, ExportFormat, StorageType,
};
use crate::activity::{self, AuditSink, NewActivity};
use crate::context::RequestContext;
use crate::error::{DestinationError, Result};
use crate::secret::Secret;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Create payload, as posted by the destination wizard.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewDestination {
    pub name: String,
    #[serde(default)]
    pub destination_type: Option<String>,
    #[serde(default)]
    pub storage_type: Option<String>,
    #[serde(default)]
    pub export_format: Option<ExportFormat>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub save_to_storage: Option<bool>,
    #[serde(default)]
    pub config: ConfigMap,
}

/// Partial update. Absent fields are left as they are.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DestinationUpdate {
    pub name: Option<String>,
    pub destination_type: Option<String>,
    pub storage_type: Option<String>,
    pub export_format: Option<ExportFormat>,
    pub schedule: Option<String>,
    pub save_to_storage: Option<bool>,
    pub config: Option<ConfigMap>,
}

pub struct LifecycleManager {
    store: Arc<DestinationStore>,
    audit: Arc<dyn AuditSink>,
}

impl LifecycleManager {
    pub fn new(store: Arc<DestinationStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub async fn create(&self, ctx: &RequestContext, input: NewDestination) -> Result<Destination> {
        async {
            let name = input.name.trim();
            if name.is_empty() {
                return Err(self.fail(
                    ctx,
                    "destination_create_error",
                    None,
                    DestinationError::InvalidInput("Destination name must not be empty".to_string()),
                ));
            }

            let storage_type = match StorageType::resolve(
                input.storage_type.as_deref(),
                input.destination_type.as_deref(),
                &input.config,
            ) {
                Ok(storage_type) => storage_type,
                Err(e) => return Err(self.fail(ctx, "destination_create_error", None, e)),
            };
            let now = Utc::now();
            let destination = Destination {
                id: Uuid::new_v4().to_string(),
                user_id: ctx.owner_id.clone(),
                name: name.to_string(),
                destination_type: input.destination_type,
                storage_type,
                status: DestinationStatus::Pending,
                export_format: input.export_format.unwrap_or_default(),
                schedule: input.schedule,
                save_to_storage: input.save_to_storage.unwrap_or(false),
                config: Secret::new(input.config),
                is_deleted: false,
                deletion_marked_at: None,
                created_at: now,
                updated_at: now,
            };

            if let Err(e) = self.store.insert(&destination) {
                return Err(self.fail(ctx, "destination_create_error", None, e.into()));
            }

            info!(destination_id = %destination.id, storage_type = %storage_type, "Destination created");
            self.audit(
                NewActivity::new(ctx, "destination_created", format!("Created destination {}", destination.name))
                    .destination(&destination.id)
                    .details(describe(&destination)),
            );
            Ok(destination)
        }
        .instrument(ctx.span("destination_create"))
        .await
    }

    /// Loads a destination owned by the caller. Soft-deleted records are
    /// returned too, so the UI can offer restore.
    pub async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Destination> {
        let destination = self.store.get(id)?;
        match destination {
            Some(d) if d.user_id == ctx.owner_id => Ok(d),
            _ => Err(DestinationError::NotFound(format!("Destination {} not found", id))),
        }
    }

    pub async fn list(&self, ctx: &RequestContext, include_deleted: bool) -> Result<Vec<Destination>> {
        Ok(self.store.list_by_owner(&ctx.owner_id, include_deleted)?)
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        update: DestinationUpdate,
    ) -> Result<Destination> {
        async {
            let mut destination = self.get(ctx, id).await?;
            if destination.is_deleted {
                return Err(self.fail(
                    ctx,
                    "destination_update_error",
                    Some(id),
                    DestinationError::PreconditionFailed(format!("Destination {} is deleted", id)),
                ));
            }

            if let Some(name) = update.name {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(self.fail(
                        ctx,
                        "destination_update_error",
                        Some(id),
                        DestinationError::InvalidInput("Destination name must not be empty".to_string()),
                    ));
                }
                destination.name = name;
            }
            if let Some(format) = update.export_format {
                destination.export_format = format;
            }
            if update.schedule.is_some() {
                destination.schedule = update.schedule;
            }
            if let Some(save) = update.save_to_storage {
                destination.save_to_storage = save;
            }

            let connection_changed = update.config.is_some()
                || update.storage_type.is_some()
                || update.destination_type.is_some();
            if connection_changed {
                if update.destination_type.is_some() {
                    destination.destination_type = update.destination_type;
                }
                if let Some(config) = update.config {
                    destination.config = Secret::new(config);
                }
                destination.storage_type = match update.storage_type.as_deref() {
                    Some(explicit) => {
                        match StorageType::resolve(Some(explicit), None, destination.config.expose()) {
                            Ok(storage_type) => storage_type,
                            Err(e) => {
                                return Err(self.fail(ctx, "destination_update_error", Some(id), e))
                            }
                        }
                    }
                    None => reresolve(&destination),
                };
                // The last connection test no longer describes this config.
                destination.status = DestinationStatus::Pending;
            }
            destination.updated_at = Utc::now();

            match self.store.update(&destination) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(self.fail(
                        ctx,
                        "destination_update_error",
                        Some(id),
                        DestinationError::PreconditionFailed(format!("Destination {} is deleted", id)),
                    ))
                }
                Err(e) => return Err(self.fail(ctx, "destination_update_error", Some(id), e.into())),
            }

            info!(destination_id = %id, connection_changed, "Destination updated");
            self.audit(
                NewActivity::new(ctx, "destination_updated", format!("Updated destination {}", destination.name))
                    .destination(id)
                    .details(describe(&destination)),
            );
            Ok(destination)
        }
        .instrument(ctx.span("destination_update"))
        .await
    }

    /// Marks a live destination deleted. The record stays restorable.
    pub async fn soft_delete(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        async {
            let destination = self.get(ctx, id).await?;
            let applied = match self.store.mark_deleted(id) {
                Ok(applied) => applied,
                Err(e) => return Err(self.fail(ctx, "destination_delete_error", Some(id), e.into())),
            };
            if !applied {
                return Err(self.fail(
                    ctx,
                    "destination_delete_error",
                    Some(id),
                    DestinationError::PreconditionFailed(format!(
                        "Destination {} is already deleted",
                        id
                    )),
                ));
            }

            info!(destination_id = %id, "Destination soft-deleted");
            self.audit(
                NewActivity::new(ctx, "destination_deleted", format!("Deleted destination {}", destination.name))
                    .destination(id),
            );
            Ok(())
        }
        .instrument(ctx.span("destination_delete"))
        .await
    }

    pub async fn restore(&self, ctx: &RequestContext, id: &str) -> Result<Destination> {
        async {
            let destination = self.get(ctx, id).await?;
            let applied = match self.store.restore(id) {
                Ok(applied) => applied,
                Err(e) => return Err(self.fail(ctx, "destination_restore_error", Some(id), e.into())),
            };
            if !applied {
                return Err(self.fail(
                    ctx,
                    "destination_restore_error",
                    Some(id),
                    DestinationError::PreconditionFailed(format!("Destination {} is not deleted", id)),
                ));
            }

            info!(destination_id = %id, "Destination restored");
            self.audit(
                NewActivity::new(ctx, "destination_restored", format!("Restored destination {}", destination.name))
                    .destination(id),
            );
            self.get(ctx, id).await
        }
        .instrument(ctx.span("destination_restore"))
        .await
    }

    /// Permanently removes a destination. Only valid after a soft delete;
    /// otherwise the record is left untouched.
    pub async fn hard_delete(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        async {
            let destination = self.get(ctx, id).await?;
            let applied = if destination.is_deleted {
                match self.store.hard_delete(id) {
                    Ok(applied) => applied,
                    Err(e) => return Err(self.fail(ctx, "destination_purge_error", Some(id), e.into())),
                }
            } else {
                false
            };
            if !applied {
                return Err(self.fail(
                    ctx,
                    "destination_purge_error",
                    Some(id),
                    DestinationError::PreconditionFailed(format!(
                        "Destination {} must be deleted before it can be purged",
                        id
                    )),
                ));
            }

            info!(destination_id = %id, "Destination purged");
            self.audit(
                NewActivity::new(ctx, "destination_purged", format!("Permanently deleted destination {}", destination.name))
                    .destination(id),
            );
            Ok(())
        }
        .instrument(ctx.span("destination_purge"))
        .await
    }

    /// Status transition used by connection tests and exports. Returns false
    /// when the destination is missing or soft-deleted.
    pub async fn record_status(&self, id: &str, status: DestinationStatus) -> Result<bool> {
        let applied = self.store.set_status(id, status)?;
        if !applied {
            warn!(destination_id = %id, status = status.as_str(), "Status not recorded: destination missing or deleted");
        }
        Ok(applied)
    }

    fn audit(&self, entry: NewActivity) {
        activity::record(self.audit.as_ref(), entry);
    }

    fn fail(
        &self,
        ctx: &RequestContext,
        event_type: &str,
        destination_id: Option<&str>,
        error: DestinationError,
    ) -> DestinationError {
        warn!(event_type, error = %error, "Destination operation failed");
        let mut entry = NewActivity::new(ctx, event_type, error.to_string())
            .details(json!({ "kind": error.kind() }));
        if let Some(id) = destination_id {
            entry = entry.destination(id);
        }
        self.audit(entry);
        error
    }
}

/// Storage type after a config-only edit. Only the FTP/SFTP split depends on
/// config contents.
fn reresolve(destination: &Destination) -> StorageType {
    match destination.storage_type {
        StorageType::Ftp | StorageType::Sftp => {
            StorageType::resolve(Some("ftp_sftp"), None, destination.config.expose())
                .unwrap_or(destination.storage_type)
        }
        other => match destination.destination_type.as_deref() {
            Some(label) if label == "FTP/SFTP" => {
                StorageType::resolve(None, Some(label), destination.config.expose()).unwrap_or(other)
            }
            _ => other,
        },
    }
}

fn describe(destination: &Destination) -> Value {
    json!({
        "name": destination.name,
        "storage_type": destination.storage_type,
        "export_format": destination.export_format,
        "config": destination.storage_config(),
    })
}
