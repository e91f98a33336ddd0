use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::sync::store::default_db_path;

pub const DEFAULT_REMOTE_SCHEMA: &str = "neta_ops";
const DEFAULT_SYNC_INTERVAL_MINS: u64 = 15;
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// PostgREST base URL. `None` leaves the engine offline.
    pub remote_url: Option<String>,
    pub remote_key: Option<String>,
    pub remote_schema: String,
    pub db_path: PathBuf,
    pub sync_interval: Duration,
    pub auto_sync: bool,
    pub upload: bool,
    pub query_timeout: Duration,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let db_path = match text("FIELDSYNC_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_db_path().context("cannot resolve default database path")?,
        };

        Ok(Self {
            remote_url: text("FIELDSYNC_REMOTE_URL"),
            remote_key: text("FIELDSYNC_REMOTE_KEY"),
            remote_schema: text("FIELDSYNC_REMOTE_SCHEMA")
                .unwrap_or_else(|| DEFAULT_REMOTE_SCHEMA.to_string()),
            db_path,
            sync_interval: Duration::from_secs(
                60 * read_u64(&lookup, "FIELDSYNC_SYNC_INTERVAL_MINS", DEFAULT_SYNC_INTERVAL_MINS),
            ),
            auto_sync: read_bool(&lookup, "FIELDSYNC_AUTO_SYNC", true),
            upload: read_bool(&lookup, "FIELDSYNC_UPLOAD", true),
            query_timeout: Duration::from_secs(read_u64(
                &lookup,
                "FIELDSYNC_QUERY_TIMEOUT_SECS",
                DEFAULT_QUERY_TIMEOUT_SECS,
            )),
        })
    }

    /// Remote URL and key, when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.remote_url.as_deref()?, self.remote_key.as_deref()?))
    }
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
