use serde::Serialize;
use serde_json::Value;

use super::store::StoreError;

/// Logical tables whose local mutations are mirrored remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    Jobs,
    Reports,
    Assets,
    JobAssets,
}

impl SyncTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTable::Jobs => "jobs",
            SyncTable::Reports => "reports",
            SyncTable::Assets => "assets",
            SyncTable::JobAssets => "job_assets",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "jobs" => Ok(SyncTable::Jobs),
            "reports" => Ok(SyncTable::Reports),
            "assets" => Ok(SyncTable::Assets),
            "job_assets" => Ok(SyncTable::JobAssets),
            other => Err(StoreError::InvalidTable(other.to_string())),
        }
    }

    /// Remote resource for tables that are not type-routed.
    pub fn fixed_resource(&self) -> Option<&'static str> {
        match self {
            SyncTable::Reports => None,
            SyncTable::Jobs => Some("jobs"),
            SyncTable::Assets => Some("assets"),
            SyncTable::JobAssets => Some("job_assets"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(StoreError::InvalidOperationKind(other.to_string())),
        }
    }
}

/// A mutation waiting to be replayed against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub id: i64,
    pub table: SyncTable,
    pub record_id: String,
    pub operation: OperationKind,
    pub payload: Option<Value>,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub failing: i64,
    pub dirty_jobs: i64,
    pub dirty_reports: i64,
    pub dirty_assets: i64,
    pub dirty_links: i64,
    pub last_full_sync: Option<String>,
}
