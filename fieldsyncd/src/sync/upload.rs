use fieldsync_core::{ApiErrorClass, RemoteError, RemoteStore, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::engine::{EngineError, SyncEngine};
use super::outbox::{OperationKind, QueueEntry, SyncTable};
use super::store::{Report, StoreError};
use super::transform::{
    FORM_INSTANCE_RESOURCE, asset_to_remote, is_form_instance, job_asset_to_remote,
    job_to_remote, patch_columns, to_form_instance_row, to_remote,
};

/// Upper bound on error strings carried back to the caller.
pub const MAX_REPORTED_ERRORS: usize = 50;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no remote resource for report type {0:?}")]
    Unroutable(String),
    #[error("{table} record {id} no longer exists locally")]
    MissingRecord { table: &'static str, id: String },
    #[error("unreadable payload snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl UploadError {
    fn retryable(&self) -> bool {
        matches!(self, UploadError::Remote(err) if err.is_retryable())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// A queue entry resolved to its remote destination.
struct Delivery {
    resource: &'static str,
    row: Option<Row>,
}

impl SyncEngine {
    /// Replays the outbound queue in creation order. A failing entry stays
    /// queued with its retry count bumped; later entries still run, unless
    /// the remote rejected our credentials, which ends the phase.
    pub(crate) async fn sync_up(&self, remote: &dyn RemoteStore) -> Result<UploadReport, EngineError> {
        let entries = self.store.pending_entries().await?;
        let mut report = UploadReport::default();
        if entries.is_empty() {
            debug!("upload queue is empty");
            return Ok(report);
        }
        info!(pending = entries.len(), "uploading queued changes");

        for entry in entries {
            report.attempted += 1;
            match self.push_entry(remote, &entry).await {
                Ok(()) => {
                    self.store.complete_entry(&entry).await?;
                    report.uploaded += 1;
                    debug!(
                        entry = entry.id,
                        table = entry.table.as_str(),
                        record = %entry.record_id,
                        "queue entry delivered"
                    );
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!(
                        entry = entry.id,
                        table = entry.table.as_str(),
                        record = %entry.record_id,
                        operation = entry.operation.as_str(),
                        retry = entry.retry_count + 1,
                        retryable = err.retryable(),
                        error = %message,
                        "queue entry failed"
                    );
                    self.store.record_entry_failure(entry.id, &message).await?;
                    if let UploadError::Remote(remote_err) = err {
                        if remote_err.classification() == Some(ApiErrorClass::Auth) {
                            return Err(EngineError::Unauthorized(remote_err));
                        }
                    }
                    report.failed += 1;
                    if report.errors.len() < MAX_REPORTED_ERRORS {
                        report.errors.push(format!(
                            "{} {} {}: {message}",
                            entry.operation.as_str(),
                            entry.table.as_str(),
                            entry.record_id
                        ));
                    }
                }
            }
        }

        info!(
            uploaded = report.uploaded,
            failed = report.failed,
            "upload finished"
        );
        Ok(report)
    }

    async fn push_entry(&self, remote: &dyn RemoteStore, entry: &QueueEntry) -> Result<(), UploadError> {
        let delivery = self.resolve(entry).await?;
        match (entry.operation, delivery.row) {
            (OperationKind::Delete, _) => remote.delete(delivery.resource, &entry.record_id).await?,
            (OperationKind::Create, Some(row)) => remote.insert(delivery.resource, &row).await?,
            (OperationKind::Update, Some(row)) => {
                remote
                    .update(delivery.resource, &entry.record_id, &patch_columns(row))
                    .await?
            }
            (_, None) => {
                return Err(UploadError::MissingRecord {
                    table: entry.table.as_str(),
                    id: entry.record_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Picks the destination resource and, unless deleting, the row to send.
    /// Never touches the network.
    async fn resolve(&self, entry: &QueueEntry) -> Result<Delivery, UploadError> {
        let deleting = entry.operation == OperationKind::Delete;
        if let Some(resource) = entry.table.fixed_resource() {
            if deleting {
                return Ok(Delivery {
                    resource,
                    row: None,
                });
            }
            let row = match entry.table {
                SyncTable::Jobs => match snapshot(entry)? {
                    Some(job) => Some(job),
                    None => self.store.get_job(&entry.record_id).await?,
                }
                .map(|job| job_to_remote(&job)),
                SyncTable::Assets => match snapshot(entry)? {
                    Some(asset) => Some(asset),
                    None => self.store.get_asset(&entry.record_id).await?,
                }
                .map(|asset| asset_to_remote(&asset)),
                SyncTable::JobAssets => match snapshot(entry)? {
                    Some(link) => Some(link),
                    None => self.store.get_job_asset(&entry.record_id).await?,
                }
                .map(|link| job_asset_to_remote(&link)),
                SyncTable::Reports => None,
            };
            return Ok(Delivery { resource, row });
        }

        let report: Option<Report> = match snapshot(entry)? {
            Some(report) => Some(report),
            None => self.store.get_report(&entry.record_id).await?,
        };
        let Some(report) = report else {
            return Err(UploadError::MissingRecord {
                table: entry.table.as_str(),
                id: entry.record_id.clone(),
            });
        };
        if is_form_instance(&report) {
            return Ok(Delivery {
                resource: FORM_INSTANCE_RESOURCE,
                row: (!deleting).then(|| to_form_instance_row(&report)),
            });
        }
        let resource = self
            .router
            .resource_for(&report.report_type)
            .ok_or_else(|| UploadError::Unroutable(report.report_type.clone()))?;
        Ok(Delivery {
            resource,
            row: (!deleting).then(|| to_remote(&report, resource)),
        })
    }
}

/// The record as it was when the entry was queued, if a snapshot was taken.
fn snapshot<T: DeserializeOwned>(entry: &QueueEntry) -> Result<Option<T>, UploadError> {
    entry
        .payload
        .as_ref()
        .map(|payload| serde_json::from_value(payload.clone()))
        .transpose()
        .map_err(UploadError::from)
}
