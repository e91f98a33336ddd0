use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fieldsync_core::{RemoteStore, RestClient};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::sync::backoff::Backoff;
use crate::sync::engine::{FullSyncReport, SyncEngine, SyncOptions};
use crate::sync::store::LocalStore;

const FAILURE_RETRY_BASE: Duration = Duration::from_secs(30);

pub struct DaemonRuntime {
    config: SyncConfig,
    engine: Arc<SyncEngine>,
    backoff: Backoff,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: SyncConfig) -> anyhow::Result<Self> {
        let store = LocalStore::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open local store at {:?}", config.db_path))?;

        let remote: Option<Arc<dyn RemoteStore>> = match config.credentials() {
            Some((url, key)) => {
                let client = RestClient::new(url, key)
                    .with_context(|| format!("invalid remote url {url:?}"))?
                    .with_schema(config.remote_schema.clone());
                Some(Arc::new(client) as Arc<dyn RemoteStore>)
            }
            None => {
                warn!("FIELDSYNC_REMOTE_URL/FIELDSYNC_REMOTE_KEY not set; running offline");
                None
            }
        };
        let engine = SyncEngine::new(store, remote).with_query_timeout(config.query_timeout);
        let backoff = Backoff::new(FAILURE_RETRY_BASE, config.sync_interval, true);

        Ok(Self {
            config,
            engine: Arc::new(engine),
            backoff,
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            upload: self.config.upload,
        }
    }

    pub async fn sync_once(&self) -> FullSyncReport {
        self.engine.full_sync(self.options()).await
    }

    /// Failure streak after `report`, and how long to wait before the next cycle.
    pub fn schedule_after(&self, report: &FullSyncReport, failures: u32) -> (u32, Duration) {
        let failures = if report.success {
            0
        } else {
            failures.saturating_add(1)
        };
        (failures, self.backoff.next_delay(failures))
    }

    /// Periodic sync until Ctrl-C.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            db = %self.config.db_path.display(),
            interval_secs = self.config.sync_interval.as_secs(),
            auto_sync = self.config.auto_sync,
            online = self.engine.has_remote(),
            "fieldsyncd started"
        );

        if !self.config.auto_sync {
            info!("auto sync disabled; idle until shutdown");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            return Ok(());
        }

        let mut failures = 0;
        loop {
            let report = self.sync_once().await;
            let (streak, delay) = self.schedule_after(&report, failures);
            failures = streak;
            if failures > 0 {
                warn!(
                    failures,
                    retry_in_secs = delay.as_secs(),
                    message = report.message.as_deref().unwrap_or_default(),
                    "sync cycle failed"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for shutdown signal")?;
                    info!("shutdown requested");
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
