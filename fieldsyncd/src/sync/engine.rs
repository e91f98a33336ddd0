use std::sync::Arc;
use std::time::Duration;

use fieldsync_core::{RemoteError, RemoteStore};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::outbox::QueueStats;
use super::routes::TypeRouter;
use super::store::{LAST_FULL_SYNC_KEY, LocalStore, StoreError, now_rfc3339};
use super::upload::MAX_REPORTED_ERRORS;

pub const ALREADY_RUNNING: &str = "sync already in progress";
pub const MISSING_CREDENTIALS: &str = "remote credentials are not configured";
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("job fetch failed: {0}")]
    JobFetch(#[source] RemoteError),
    #[error("{query} query timed out after {after:?}")]
    Timeout { query: &'static str, after: Duration },
    #[error("remote rejected credentials: {0}")]
    Unauthorized(#[source] RemoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub upload: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { upload: true }
    }
}

/// Outcome of one orchestrated sync. Never an `Err`: fatal conditions set
/// `success = false` and `message`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FullSyncReport {
    pub success: bool,
    pub jobs: usize,
    pub reports: usize,
    pub templates: usize,
    pub assets: usize,
    pub uploaded: usize,
    pub upload_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub errors: Vec<String>,
}

impl FullSyncReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn push_errors(&mut self, errors: Vec<String>) {
        let room = MAX_REPORTED_ERRORS.saturating_sub(self.errors.len());
        self.errors.extend(errors.into_iter().take(room));
    }
}

pub struct SyncEngine {
    pub(crate) store: LocalStore,
    remote: Option<Arc<dyn RemoteStore>>,
    pub(crate) router: &'static TypeRouter,
    pub(crate) query_timeout: Duration,
    running: Mutex<()>,
}

impl SyncEngine {
    /// `remote` is `None` when no credentials are configured; every sync then
    /// reports failure without touching local data.
    pub fn new(store: LocalStore, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            store,
            remote,
            router: TypeRouter::global(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            running: Mutex::new(()),
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Full resync followed, if requested, by draining the upload queue.
    pub async fn full_sync(&self, options: SyncOptions) -> FullSyncReport {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("sync requested while another is running");
            return FullSyncReport::failed(ALREADY_RUNNING);
        };
        let Some(remote) = self.remote.as_deref() else {
            warn!("sync skipped: {MISSING_CREDENTIALS}");
            return FullSyncReport::failed(MISSING_CREDENTIALS);
        };

        info!(upload = options.upload, "full sync started");
        let down = match self.sync_down(remote).await {
            Ok(down) => down,
            Err(err) => {
                error!(error = %err, "full sync aborted");
                return FullSyncReport::failed(err.to_string());
            }
        };

        let mut report = FullSyncReport {
            success: true,
            jobs: down.jobs,
            reports: down.reports,
            templates: down.templates,
            assets: down.assets,
            ..FullSyncReport::default()
        };
        report.push_errors(down.errors);

        if options.upload {
            match self.sync_up(remote).await {
                Ok(up) => {
                    report.uploaded = up.uploaded;
                    report.upload_failed = up.failed;
                    report.push_errors(up.errors);
                }
                Err(err) => {
                    error!(error = %err, "upload phase aborted");
                    report.success = false;
                    report.message = Some(err.to_string());
                    return report;
                }
            }
        }

        match now_rfc3339() {
            Ok(now) => {
                if let Err(err) = self.store.set_setting(LAST_FULL_SYNC_KEY, &now).await {
                    warn!(error = %err, "failed to record last full sync");
                }
            }
            Err(err) => warn!(error = %err, "failed to format sync timestamp"),
        }
        info!(
            jobs = report.jobs,
            reports = report.reports,
            uploaded = report.uploaded,
            errors = report.errors.len(),
            "full sync finished"
        );
        report
    }

    /// Drains the upload queue without downloading.
    pub async fn upload_only(&self) -> FullSyncReport {
        let Ok(_guard) = self.running.try_lock() else {
            return FullSyncReport::failed(ALREADY_RUNNING);
        };
        let Some(remote) = self.remote.as_deref() else {
            return FullSyncReport::failed(MISSING_CREDENTIALS);
        };
        match self.sync_up(remote).await {
            Ok(up) => {
                let mut report = FullSyncReport {
                    success: true,
                    uploaded: up.uploaded,
                    upload_failed: up.failed,
                    ..FullSyncReport::default()
                };
                report.push_errors(up.errors);
                report
            }
            Err(err) => {
                error!(error = %err, "upload aborted");
                FullSyncReport::failed(err.to_string())
            }
        }
    }

    pub async fn status(&self) -> Result<QueueStats, EngineError> {
        Ok(self.store.queue_stats().await?)
    }

    /// Operator escape hatch for an entry that can never succeed.
    pub async fn discard_entry(&self, entry_id: i64) -> Result<bool, EngineError> {
        let removed = self.store.discard_entry(entry_id).await?;
        if removed {
            warn!(entry = entry_id, "queue entry discarded by operator");
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
