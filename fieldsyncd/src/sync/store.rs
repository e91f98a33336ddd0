use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool, migrate::Migrator};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::outbox::{OperationKind, QueueEntry, QueueStats, SyncTable};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub const LAST_FULL_SYNC_KEY: &str = "last_full_sync";

const JOB_COLUMNS: &str = "id, job_number, title, description, status, division, location, address, start_date, due_date, priority, customer_id, customer_name, customer_company, customer_email, customer_phone, customer_address, notes, created_at, updated_at, dirty, last_sync_at";
const REPORT_COLUMNS: &str = "id, job_id, title, report_type, status, data, submitted_by, version, revision_history, created_at, updated_at, dirty, last_sync_at";
const ASSET_COLUMNS: &str =
    "id, name, file_url, status, approved_at, sent_at, created_at, dirty, last_sync_at";
const LINK_COLUMNS: &str = "id, job_id, asset_id, user_id, created_at, dirty, last_sync_at";
const TEMPLATE_COLUMNS: &str =
    "id, name, report_type, template_data, version, is_active, created_at, updated_at";
const QUEUE_COLUMNS: &str =
    "id, table_name, record_id, operation, payload, retry_count, last_error, created_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("time format error: {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("user data directory is unavailable")]
    MissingDataDir,
    #[error("invalid sync table: {0}")]
    InvalidTable(String),
    #[error("invalid operation kind: {0}")]
    InvalidOperationKind(String),
    #[error("invalid report status: {0}")]
    InvalidStatus(String),
    #[error("{table} record not found: {id}")]
    NotFound { table: &'static str, id: String },
}

/// Who is writing a row. Sync writes are clean, never clobber dirty rows and
/// skip records whose local delete is still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    Local,
    Sync,
}

impl WriteOrigin {
    fn dirty(self) -> i64 {
        match self {
            WriteOrigin::Local => 1,
            WriteOrigin::Sync => 0,
        }
    }

    fn last_sync_at(self) -> Option<i64> {
        match self {
            WriteOrigin::Local => None,
            WriteOrigin::Sync => Some(now_unix()),
        }
    }

    fn conflict_guard(self, table: &str) -> String {
        match self {
            WriteOrigin::Local => "1".to_string(),
            WriteOrigin::Sync => format!("{table}.dirty = 0"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Draft,
    Submitted,
    Reviewed,
    Approved,
    Sent,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Submitted => "submitted",
            ReportStatus::Reviewed => "reviewed",
            ReportStatus::Approved => "approved",
            ReportStatus::Sent => "sent",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "draft" => Ok(ReportStatus::Draft),
            "submitted" => Ok(ReportStatus::Submitted),
            "reviewed" => Ok(ReportStatus::Reviewed),
            "approved" => Ok(ReportStatus::Approved),
            "sent" => Ok(ReportStatus::Sent),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_number: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub division: Option<String>,
    pub location: Option<String>,
    pub address: Option<String>,
    pub start_date: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<String>,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_company: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub last_sync_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub job_id: String,
    pub title: String,
    pub report_type: String,
    pub status: ReportStatus,
    pub data: Value,
    pub submitted_by: Option<String>,
    pub version: i64,
    pub revision_history: Value,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub last_sync_at: Option<i64>,
}

impl Report {
    pub fn draft(id: impl Into<String>, job_id: impl Into<String>, report_type: &str) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            title: String::new(),
            report_type: report_type.to_string(),
            status: ReportStatus::Draft,
            data: Value::Object(Default::default()),
            submitted_by: None,
            version: 1,
            revision_history: Value::Array(Vec::new()),
            created_at: None,
            updated_at: None,
            dirty: false,
            last_sync_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub file_url: Option<String>,
    pub status: Option<String>,
    pub approved_at: Option<String>,
    pub sent_at: Option<String>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub last_sync_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobAsset {
    pub id: String,
    pub job_id: String,
    pub asset_id: String,
    pub user_id: Option<String>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub last_sync_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportTemplate {
    pub id: String,
    pub name: String,
    pub report_type: String,
    pub template_data: Value,
    pub version: i64,
    pub is_active: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearSummary {
    pub links: u64,
    pub reports: u64,
    pub assets: u64,
    pub jobs: u64,
}

/// Embedded store for everything the field device keeps offline.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn execute_raw(&self, sql: &str) -> Result<u64, StoreError> {
        let result = sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // ---- jobs ----

    /// Returns false when a sync write was skipped because the row is dirty.
    pub async fn upsert_job(&self, job: &Job, origin: WriteOrigin) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_job(&mut conn, job, origin).await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    // ---- reports ----

    pub async fn upsert_report(
        &self,
        report: &Report,
        origin: WriteOrigin,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_report(&mut conn, report, origin).await
    }

    pub async fn get_report(&self, id: &str) -> Result<Option<Report>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    pub async fn list_reports(&self, job_id: Option<&str>) -> Result<Vec<Report>, StoreError> {
        let rows = match job_id {
            Some(job_id) => {
                sqlx::query(&format!(
                    "SELECT {REPORT_COLUMNS} FROM reports WHERE job_id = ?1 ORDER BY id ASC"
                ))
                .bind(job_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {REPORT_COLUMNS} FROM reports ORDER BY id ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(report_from_row).collect()
    }

    // ---- assets and links ----

    pub async fn upsert_asset(&self, asset: &Asset, origin: WriteOrigin) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_asset(&mut conn, asset, origin).await
    }

    pub async fn get_asset(&self, id: &str) -> Result<Option<Asset>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(asset_from_row).transpose()
    }

    pub async fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(asset_from_row).collect()
    }

    pub async fn upsert_job_asset(
        &self,
        link: &JobAsset,
        origin: WriteOrigin,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_job_asset(&mut conn, link, origin).await
    }

    pub async fn get_job_asset(&self, id: &str) -> Result<Option<JobAsset>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {LINK_COLUMNS} FROM job_assets WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(link_from_row).transpose()
    }

    pub async fn list_job_assets(&self) -> Result<Vec<JobAsset>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LINK_COLUMNS} FROM job_assets ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(link_from_row).collect()
    }

    // ---- templates ----

    /// Replaces the whole template table in one transaction.
    pub async fn replace_templates(&self, templates: &[ReportTemplate]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM report_templates")
            .execute(&mut *tx)
            .await?;
        for template in templates {
            sqlx::query(&format!(
                "INSERT INTO report_templates ({TEMPLATE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    report_type = excluded.report_type,
                    template_data = excluded.template_data,
                    version = excluded.version,
                    is_active = excluded.is_active,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at"
            ))
            .bind(&template.id)
            .bind(&template.name)
            .bind(&template.report_type)
            .bind(serde_json::to_string(&template.template_data)?)
            .bind(template.version)
            .bind(if template.is_active { 1 } else { 0 })
            .bind(&template.created_at)
            .bind(&template.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(templates.len())
    }

    pub async fn list_templates(&self) -> Result<Vec<ReportTemplate>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM report_templates ORDER BY name ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let template_data: String = row.try_get("template_data")?;
            let is_active: i64 = row.try_get("is_active")?;
            out.push(ReportTemplate {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                report_type: row.try_get("report_type")?,
                template_data: serde_json::from_str(&template_data)?,
                version: row.try_get("version")?,
                is_active: is_active != 0,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            });
        }
        Ok(out)
    }

    // ---- resync ----

    /// Drops every clean row ahead of a full resync, children before parents.
    ///
    /// Dirty rows survive, and so do clean jobs and assets still referenced by
    /// them.
    pub async fn clear_for_resync(&self) -> Result<ClearSummary, StoreError> {
        let mut tx = self.pool.begin().await?;
        let links = sqlx::query("DELETE FROM job_assets WHERE dirty = 0")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let reports = sqlx::query("DELETE FROM reports WHERE dirty = 0")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let assets = sqlx::query(
            "DELETE FROM assets WHERE dirty = 0 AND id NOT IN (SELECT asset_id FROM job_assets)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let jobs = sqlx::query(
            "DELETE FROM jobs WHERE dirty = 0
                AND id NOT IN (SELECT job_id FROM reports)
                AND id NOT IN (SELECT job_id FROM job_assets)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok(ClearSummary {
            links,
            reports,
            assets,
            jobs,
        })
    }

    // ---- local mutations ----

    pub async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut job = job.clone();
        job.updated_at = Some(now_rfc3339()?);
        let mut tx = self.pool.begin().await?;
        write_job(&mut tx, &job, WriteOrigin::Local).await?;
        enqueue_in(
            &mut tx,
            SyncTable::Jobs,
            &job.id,
            OperationKind::Update,
            Some(&serde_json::to_value(&job)?),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_job_status(&self, id: &str, status: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE jobs SET status = ?1, updated_at = ?2, dirty = 1 WHERE id = ?3",
        )
        .bind(status)
        .bind(now_rfc3339()?)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound {
                table: "jobs",
                id: id.to_string(),
            });
        }
        enqueue_in(&mut tx, SyncTable::Jobs, id, OperationKind::Update, None).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn create_report(&self, report: &Report) -> Result<Report, StoreError> {
        let mut report = report.clone();
        let now = now_rfc3339()?;
        report.created_at.get_or_insert_with(|| now.clone());
        report.updated_at = Some(now);
        let mut tx = self.pool.begin().await?;
        write_report(&mut tx, &report, WriteOrigin::Local).await?;
        enqueue_in(
            &mut tx,
            SyncTable::Reports,
            &report.id,
            OperationKind::Create,
            Some(&serde_json::to_value(&report)?),
        )
        .await?;
        tx.commit().await?;
        report.dirty = true;
        Ok(report)
    }

    pub async fn update_report(&self, report: &Report) -> Result<Report, StoreError> {
        let mut report = report.clone();
        report.updated_at = Some(now_rfc3339()?);
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM reports WHERE id = ?1")
            .bind(&report.id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound {
                table: "reports",
                id: report.id,
            });
        }
        write_report(&mut tx, &report, WriteOrigin::Local).await?;
        enqueue_in(
            &mut tx,
            SyncTable::Reports,
            &report.id,
            OperationKind::Update,
            Some(&serde_json::to_value(&report)?),
        )
        .await?;
        tx.commit().await?;
        report.dirty = true;
        Ok(report)
    }

    /// Removes the row locally; the queued snapshot keeps enough to route the
    /// remote delete.
    pub async fn delete_report(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound {
                table: "reports",
                id: id.to_string(),
            });
        };
        let report = report_from_row(&row)?;
        sqlx::query("DELETE FROM reports WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        enqueue_in(
            &mut tx,
            SyncTable::Reports,
            id,
            OperationKind::Delete,
            Some(&serde_json::to_value(&report)?),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn create_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let mut asset = asset.clone();
        asset.created_at.get_or_insert(now_rfc3339()?);
        let mut tx = self.pool.begin().await?;
        write_asset(&mut tx, &asset, WriteOrigin::Local).await?;
        enqueue_in(
            &mut tx,
            SyncTable::Assets,
            &asset.id,
            OperationKind::Create,
            Some(&serde_json::to_value(&asset)?),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn link_asset_to_job(&self, link: &JobAsset) -> Result<(), StoreError> {
        let mut link = link.clone();
        link.created_at.get_or_insert(now_rfc3339()?);
        let mut tx = self.pool.begin().await?;
        write_job_asset(&mut tx, &link, WriteOrigin::Local).await?;
        enqueue_in(
            &mut tx,
            SyncTable::JobAssets,
            &link.id,
            OperationKind::Create,
            Some(&serde_json::to_value(&link)?),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Deletes an asset along with its job links, queueing a remote delete
    /// for each link before the asset itself.
    pub async fn delete_asset(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let link_rows = sqlx::query("SELECT id FROM job_assets WHERE asset_id = ?1 ORDER BY id")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        for row in link_rows {
            let link_id: String = row.try_get("id")?;
            sqlx::query("DELETE FROM job_assets WHERE id = ?1")
                .bind(&link_id)
                .execute(&mut *tx)
                .await?;
            enqueue_in(
                &mut tx,
                SyncTable::JobAssets,
                &link_id,
                OperationKind::Delete,
                None,
            )
            .await?;
        }
        let deleted = sqlx::query("DELETE FROM assets WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound {
                table: "assets",
                id: id.to_string(),
            });
        }
        enqueue_in(&mut tx, SyncTable::Assets, id, OperationKind::Delete, None).await?;
        tx.commit().await?;
        Ok(())
    }

    // ---- queue ----

    pub async fn enqueue(
        &self,
        table: SyncTable,
        record_id: &str,
        operation: OperationKind,
        payload: Option<&Value>,
    ) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        enqueue_in(&mut conn, table, record_id, operation, payload).await
    }

    /// Pending entries in creation order.
    pub async fn pending_entries(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Drops a delivered entry and marks its record clean, unless newer
    /// entries for the same record are still waiting.
    pub async fn complete_entry(&self, entry: &QueueEntry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(entry.id)
            .execute(&mut *tx)
            .await?;
        if entry.operation != OperationKind::Delete {
            sqlx::query(&format!(
                "UPDATE {table} SET dirty = 0, last_sync_at = ?1
                 WHERE id = ?2
                   AND NOT EXISTS (
                       SELECT 1 FROM sync_queue WHERE table_name = ?3 AND record_id = ?2
                   )",
                table = entry.table.as_str()
            ))
            .bind(now_unix())
            .bind(&entry.record_id)
            .bind(entry.table.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn record_entry_failure(&self, entry_id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sync_queue SET retry_count = retry_count + 1, last_error = ?1 WHERE id = ?2",
        )
        .bind(error)
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Operator escape hatch; the engine itself never drops entries.
    pub async fn discard_entry(&self, entry_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, StoreError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM sync_queue) AS pending,
                (SELECT COUNT(*) FROM sync_queue WHERE retry_count > 0) AS failing,
                (SELECT COUNT(*) FROM jobs WHERE dirty = 1) AS dirty_jobs,
                (SELECT COUNT(*) FROM reports WHERE dirty = 1) AS dirty_reports,
                (SELECT COUNT(*) FROM assets WHERE dirty = 1) AS dirty_assets,
                (SELECT COUNT(*) FROM job_assets WHERE dirty = 1) AS dirty_links",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueStats {
            pending: row.try_get("pending")?,
            failing: row.try_get("failing")?,
            dirty_jobs: row.try_get("dirty_jobs")?,
            dirty_reports: row.try_get("dirty_reports")?,
            dirty_assets: row.try_get("dirty_assets")?,
            dirty_links: row.try_get("dirty_links")?,
            last_full_sync: self.get_setting(LAST_FULL_SYNC_KEY).await?,
        })
    }

    // ---- settings ----

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM app_settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row.try_get("value").map_err(StoreError::from))
            .transpose()
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn write_job(
    conn: &mut SqliteConnection,
    job: &Job,
    origin: WriteOrigin,
) -> Result<bool, StoreError> {
    if origin == WriteOrigin::Sync && delete_pending(conn, SyncTable::Jobs, &job.id).await? {
        return Ok(false);
    }
    let result = sqlx::query(&format!(
        "INSERT INTO jobs ({JOB_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)
         ON CONFLICT(id) DO UPDATE SET
            job_number = excluded.job_number,
            title = excluded.title,
            description = excluded.description,
            status = excluded.status,
            division = excluded.division,
            location = excluded.location,
            address = excluded.address,
            start_date = excluded.start_date,
            due_date = excluded.due_date,
            priority = excluded.priority,
            customer_id = excluded.customer_id,
            customer_name = excluded.customer_name,
            customer_company = excluded.customer_company,
            customer_email = excluded.customer_email,
            customer_phone = excluded.customer_phone,
            customer_address = excluded.customer_address,
            notes = excluded.notes,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            dirty = excluded.dirty,
            last_sync_at = COALESCE(excluded.last_sync_at, jobs.last_sync_at)
         WHERE {guard}",
        guard = origin.conflict_guard("jobs")
    ))
    .bind(&job.id)
    .bind(&job.job_number)
    .bind(&job.title)
    .bind(&job.description)
    .bind(&job.status)
    .bind(&job.division)
    .bind(&job.location)
    .bind(&job.address)
    .bind(&job.start_date)
    .bind(&job.due_date)
    .bind(&job.priority)
    .bind(&job.customer_id)
    .bind(&job.customer_name)
    .bind(&job.customer_company)
    .bind(&job.customer_email)
    .bind(&job.customer_phone)
    .bind(&job.customer_address)
    .bind(&job.notes)
    .bind(&job.created_at)
    .bind(&job.updated_at)
    .bind(origin.dirty())
    .bind(origin.last_sync_at())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn write_report(
    conn: &mut SqliteConnection,
    report: &Report,
    origin: WriteOrigin,
) -> Result<bool, StoreError> {
    if origin == WriteOrigin::Sync && delete_pending(conn, SyncTable::Reports, &report.id).await? {
        return Ok(false);
    }
    let result = sqlx::query(&format!(
        "INSERT INTO reports ({REPORT_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
            job_id = excluded.job_id,
            title = excluded.title,
            report_type = excluded.report_type,
            status = excluded.status,
            data = excluded.data,
            submitted_by = excluded.submitted_by,
            version = excluded.version,
            revision_history = excluded.revision_history,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            dirty = excluded.dirty,
            last_sync_at = COALESCE(excluded.last_sync_at, reports.last_sync_at)
         WHERE {guard}",
        guard = origin.conflict_guard("reports")
    ))
    .bind(&report.id)
    .bind(&report.job_id)
    .bind(&report.title)
    .bind(&report.report_type)
    .bind(report.status.as_str())
    .bind(serde_json::to_string(&report.data)?)
    .bind(&report.submitted_by)
    .bind(report.version)
    .bind(serde_json::to_string(&report.revision_history)?)
    .bind(&report.created_at)
    .bind(&report.updated_at)
    .bind(origin.dirty())
    .bind(origin.last_sync_at())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn write_asset(
    conn: &mut SqliteConnection,
    asset: &Asset,
    origin: WriteOrigin,
) -> Result<bool, StoreError> {
    if origin == WriteOrigin::Sync && delete_pending(conn, SyncTable::Assets, &asset.id).await? {
        return Ok(false);
    }
    let result = sqlx::query(&format!(
        "INSERT INTO assets ({ASSET_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            file_url = excluded.file_url,
            status = excluded.status,
            approved_at = excluded.approved_at,
            sent_at = excluded.sent_at,
            created_at = excluded.created_at,
            dirty = excluded.dirty,
            last_sync_at = COALESCE(excluded.last_sync_at, assets.last_sync_at)
         WHERE {guard}",
        guard = origin.conflict_guard("assets")
    ))
    .bind(&asset.id)
    .bind(&asset.name)
    .bind(&asset.file_url)
    .bind(&asset.status)
    .bind(&asset.approved_at)
    .bind(&asset.sent_at)
    .bind(&asset.created_at)
    .bind(origin.dirty())
    .bind(origin.last_sync_at())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn write_job_asset(
    conn: &mut SqliteConnection,
    link: &JobAsset,
    origin: WriteOrigin,
) -> Result<bool, StoreError> {
    if origin == WriteOrigin::Sync && delete_pending(conn, SyncTable::JobAssets, &link.id).await? {
        return Ok(false);
    }
    let result = sqlx::query(&format!(
        "INSERT INTO job_assets ({LINK_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            job_id = excluded.job_id,
            asset_id = excluded.asset_id,
            user_id = excluded.user_id,
            created_at = excluded.created_at,
            dirty = excluded.dirty,
            last_sync_at = COALESCE(excluded.last_sync_at, job_assets.last_sync_at)
         WHERE {guard}",
        guard = origin.conflict_guard("job_assets")
    ))
    .bind(&link.id)
    .bind(&link.job_id)
    .bind(&link.asset_id)
    .bind(&link.user_id)
    .bind(&link.created_at)
    .bind(origin.dirty())
    .bind(origin.last_sync_at())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// A record deleted locally stays deleted until its delete has been delivered.
async fn delete_pending(
    conn: &mut SqliteConnection,
    table: SyncTable,
    record_id: &str,
) -> Result<bool, StoreError> {
    let row = sqlx::query(
        "SELECT 1 FROM sync_queue
         WHERE table_name = ?1 AND record_id = ?2 AND operation = ?3
         LIMIT 1",
    )
    .bind(table.as_str())
    .bind(record_id)
    .bind(OperationKind::Delete.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.is_some())
}

async fn enqueue_in(
    conn: &mut SqliteConnection,
    table: SyncTable,
    record_id: &str,
    operation: OperationKind,
    payload: Option<&Value>,
) -> Result<i64, StoreError> {
    let payload = payload.map(serde_json::to_string).transpose()?;
    let result = sqlx::query(
        "INSERT INTO sync_queue (table_name, record_id, operation, payload, retry_count, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
    )
    .bind(table.as_str())
    .bind(record_id)
    .bind(operation.as_str())
    .bind(payload)
    .bind(now_unix())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    let dirty: i64 = row.try_get("dirty")?;
    Ok(Job {
        id: row.try_get("id")?,
        job_number: row.try_get("job_number")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: row.try_get("status")?,
        division: row.try_get("division")?,
        location: row.try_get("location")?,
        address: row.try_get("address")?,
        start_date: row.try_get("start_date")?,
        due_date: row.try_get("due_date")?,
        priority: row.try_get("priority")?,
        customer_id: row.try_get("customer_id")?,
        customer_name: row.try_get("customer_name")?,
        customer_company: row.try_get("customer_company")?,
        customer_email: row.try_get("customer_email")?,
        customer_phone: row.try_get("customer_phone")?,
        customer_address: row.try_get("customer_address")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        dirty: dirty != 0,
        last_sync_at: row.try_get("last_sync_at")?,
    })
}

fn report_from_row(row: &SqliteRow) -> Result<Report, StoreError> {
    let status: String = row.try_get("status")?;
    let data: String = row.try_get("data")?;
    let revision_history: String = row.try_get("revision_history")?;
    let dirty: i64 = row.try_get("dirty")?;
    Ok(Report {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        title: row.try_get("title")?,
        report_type: row.try_get("report_type")?,
        status: ReportStatus::parse(&status)?,
        data: serde_json::from_str(&data)?,
        submitted_by: row.try_get("submitted_by")?,
        version: row.try_get("version")?,
        revision_history: serde_json::from_str(&revision_history)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        dirty: dirty != 0,
        last_sync_at: row.try_get("last_sync_at")?,
    })
}

fn asset_from_row(row: &SqliteRow) -> Result<Asset, StoreError> {
    let dirty: i64 = row.try_get("dirty")?;
    Ok(Asset {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        file_url: row.try_get("file_url")?,
        status: row.try_get("status")?,
        approved_at: row.try_get("approved_at")?,
        sent_at: row.try_get("sent_at")?,
        created_at: row.try_get("created_at")?,
        dirty: dirty != 0,
        last_sync_at: row.try_get("last_sync_at")?,
    })
}

fn link_from_row(row: &SqliteRow) -> Result<JobAsset, StoreError> {
    let dirty: i64 = row.try_get("dirty")?;
    Ok(JobAsset {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        asset_id: row.try_get("asset_id")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
        dirty: dirty != 0,
        last_sync_at: row.try_get("last_sync_at")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<QueueEntry, StoreError> {
    let table: String = row.try_get("table_name")?;
    let operation: String = row.try_get("operation")?;
    let payload: Option<String> = row.try_get("payload")?;
    Ok(QueueEntry {
        id: row.try_get("id")?,
        table: SyncTable::parse(&table)?,
        record_id: row.try_get("record_id")?,
        operation: OperationKind::parse(&operation)?,
        payload: payload.as_deref().map(serde_json::from_str).transpose()?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub fn now_rfc3339() -> Result<String, StoreError> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}

pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("field-sync");
    path.push("field-tech.db");
    Ok(path)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
