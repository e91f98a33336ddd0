use std::collections::{BTreeMap, HashMap, HashSet};

use fieldsync_core::{Query, RemoteStore, Row, row_str};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::engine::{EngineError, SyncEngine};
use super::locator::{ReportLocator, is_report_locator, parse_report_locator};
use super::store::{Asset, Job, JobAsset, Report, ReportStatus, ReportTemplate, WriteOrigin};
use super::transform::{
    FORM_INSTANCE_RESOURCE, InboundReport, as_object, form_instance_payload, from_remote,
};

pub const ELIGIBLE_JOB_STATUS: &str = "in_progress";
const TEMPLATES_RESOURCE: &str = "custom_form_templates";
const CUSTOMERS_RESOURCE: &str = "common.customers";
const CUSTOMER_COLUMNS: &[&str] = &["id", "name", "company_name", "address", "phone", "email"];
const ASSET_COLUMNS: &[&str] = &[
    "id",
    "name",
    "file_url",
    "created_at",
    "status",
    "approved_at",
    "sent_at",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub templates: usize,
    pub jobs: usize,
    pub assets: usize,
    pub links: usize,
    pub reports: usize,
    pub errors: Vec<String>,
}

impl DownloadReport {
    fn note(&mut self, error: String) {
        warn!(error = %error, "download step degraded");
        self.errors.push(error);
    }
}

/// A report discovered through an asset locator.
#[derive(Debug, Clone)]
struct Reference {
    locator: ReportLocator,
    asset_name: String,
}

impl SyncEngine {
    /// Full destructive resync. Only the job fetch is fatal; every other
    /// group degrades to a logged error.
    pub(crate) async fn sync_down(&self, remote: &dyn RemoteStore) -> Result<DownloadReport, EngineError> {
        let mut report = DownloadReport::default();

        report.templates = self.download_templates(remote, &mut report).await;

        let jobs = self.fetch_jobs(remote).await?;
        let jobs = self.attach_customers(remote, jobs, &mut report).await;
        let cleared = self.store.clear_for_resync().await?;
        debug!(?cleared, "local tables cleared");

        let mut known_jobs = HashSet::new();
        for job in &jobs {
            if self.write_job(job, &mut report).await {
                known_jobs.insert(job.id.clone());
            }
        }
        let job_ids: Vec<String> = jobs.iter().map(|job| job.id.clone()).collect();
        info!(jobs = report.jobs, "jobs downloaded");

        let assets = self.download_assets(remote, &job_ids, &mut report).await;
        let references = self.collect_references(&assets);
        self.download_referenced_reports(remote, references, &mut known_jobs, &mut report)
            .await;
        self.download_form_instances(remote, &job_ids, &mut report)
            .await;

        info!(
            templates = report.templates,
            jobs = report.jobs,
            assets = report.assets,
            links = report.links,
            reports = report.reports,
            errors = report.errors.len(),
            "download finished"
        );
        Ok(report)
    }

    async fn download_templates(&self, remote: &dyn RemoteStore, report: &mut DownloadReport) -> usize {
        let query = Query::all()
            .eq("is_active", true)
            .with_timeout(self.query_timeout);
        let rows = match remote.select(TEMPLATES_RESOURCE, &query).await {
            Ok(rows) => rows,
            Err(err) => {
                report.note(format!("form templates: {err}"));
                return 0;
            }
        };
        let templates: Vec<ReportTemplate> = rows.iter().filter_map(template_from_remote).collect();
        match self.store.replace_templates(&templates).await {
            Ok(written) => written,
            Err(err) => {
                report.note(format!("form templates: {err}"));
                0
            }
        }
    }

    async fn fetch_jobs(&self, remote: &dyn RemoteStore) -> Result<Vec<Job>, EngineError> {
        let query = Query::all()
            .eq("status", ELIGIBLE_JOB_STATUS)
            .with_timeout(self.query_timeout);
        let rows = remote.select("jobs", &query).await.map_err(|err| {
            if err.is_timeout() {
                EngineError::Timeout {
                    query: "jobs",
                    after: self.query_timeout,
                }
            } else {
                EngineError::JobFetch(err)
            }
        })?;
        Ok(rows.iter().filter_map(job_from_remote).collect())
    }

    async fn attach_customers(
        &self,
        remote: &dyn RemoteStore,
        mut jobs: Vec<Job>,
        report: &mut DownloadReport,
    ) -> Vec<Job> {
        let mut customer_ids: Vec<String> = jobs
            .iter()
            .filter_map(|job| job.customer_id.clone())
            .collect();
        customer_ids.sort();
        customer_ids.dedup();

        let query = Query::columns(CUSTOMER_COLUMNS)
            .in_list("id", customer_ids)
            .with_timeout(self.query_timeout);
        let customers: HashMap<String, Row> = match remote.select(CUSTOMERS_RESOURCE, &query).await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| Some((row_str(&row, "id")?.to_string(), row)))
                .collect(),
            Err(err) => {
                report.note(format!("customers: {err}"));
                HashMap::new()
            }
        };

        for job in &mut jobs {
            let Some(customer) = job
                .customer_id
                .as_ref()
                .and_then(|id| customers.get(id))
            else {
                continue;
            };
            let field = |column: &str| row_str(customer, column).filter(|v| !v.is_empty());
            job.customer_name = field("name")
                .or_else(|| field("company_name"))
                .map(str::to_string)
                .or(job.customer_name.take());
            job.customer_company = field("company_name").map(str::to_string);
            job.customer_email = field("email").map(str::to_string);
            job.customer_phone = field("phone").map(str::to_string);
            job.customer_address = field("address")
                .map(str::to_string)
                .or(job.customer_address.take())
                .or_else(|| job.address.clone());
        }
        jobs
    }

    async fn write_job(&self, job: &Job, report: &mut DownloadReport) -> bool {
        match self.store.upsert_job(job, WriteOrigin::Sync).await {
            Ok(written) => {
                if written {
                    report.jobs += 1;
                } else {
                    debug!(job = %job.id, "kept locally modified job");
                }
                true
            }
            Err(err) => {
                report.note(format!("job {}: {err}", job.id));
                false
            }
        }
    }

    /// Fetches job links and the assets they point at, writing assets first.
    async fn download_assets(
        &self,
        remote: &dyn RemoteStore,
        job_ids: &[String],
        report: &mut DownloadReport,
    ) -> Vec<Asset> {
        let query = Query::all()
            .in_list("job_id", job_ids.iter().cloned())
            .with_timeout(self.query_timeout);
        let links: Vec<JobAsset> = match remote.select("job_assets", &query).await {
            Ok(rows) => rows.iter().filter_map(job_asset_from_remote).collect(),
            Err(err) => {
                report.note(format!("job assets: {err}"));
                return Vec::new();
            }
        };

        let mut asset_ids: Vec<String> = links.iter().map(|link| link.asset_id.clone()).collect();
        asset_ids.sort();
        asset_ids.dedup();
        let query = Query::columns(ASSET_COLUMNS)
            .in_list("id", asset_ids)
            .with_timeout(self.query_timeout);
        let assets: Vec<Asset> = match remote.select("assets", &query).await {
            Ok(rows) => rows.iter().filter_map(asset_from_remote).collect(),
            Err(err) => {
                report.note(format!("assets: {err}"));
                return Vec::new();
            }
        };

        let mut stored = HashSet::new();
        for asset in &assets {
            match self.store.upsert_asset(asset, WriteOrigin::Sync).await {
                Ok(written) => {
                    report.assets += usize::from(written);
                    stored.insert(asset.id.as_str());
                }
                Err(err) => report.note(format!("asset {}: {err}", asset.id)),
            }
        }
        for link in links.iter().filter(|link| stored.contains(link.asset_id.as_str())) {
            match self.store.upsert_job_asset(link, WriteOrigin::Sync).await {
                Ok(written) => report.links += usize::from(written),
                Err(err) => report.note(format!("job asset {}: {err}", link.id)),
            }
        }
        info!(assets = report.assets, links = report.links, "assets downloaded");
        assets
    }

    /// Groups report references by remote resource, one entry per report id.
    fn collect_references(&self, assets: &[Asset]) -> BTreeMap<&'static str, Vec<Reference>> {
        let mut seen = HashSet::new();
        let mut groups: BTreeMap<&'static str, Vec<Reference>> = BTreeMap::new();
        for asset in assets {
            let Some(file_url) = asset.file_url.as_deref().filter(|url| is_report_locator(url)) else {
                continue;
            };
            let Some(locator) = parse_report_locator(file_url) else {
                warn!(asset = %asset.id, file_url, "malformed report locator");
                continue;
            };
            let Some(resource) = self.router.resource_for(&locator.slug) else {
                warn!(asset = %asset.id, slug = %locator.slug, "unknown report type, skipping");
                continue;
            };
            if !seen.insert(locator.report_id.clone()) {
                continue;
            }
            groups.entry(resource).or_default().push(Reference {
                locator,
                asset_name: asset.name.clone(),
            });
        }
        groups
    }

    async fn download_referenced_reports(
        &self,
        remote: &dyn RemoteStore,
        groups: BTreeMap<&'static str, Vec<Reference>>,
        known_jobs: &mut HashSet<String>,
        report: &mut DownloadReport,
    ) {
        let mut fetched: Vec<(InboundReport, Reference)> = Vec::new();
        for (resource, references) in groups {
            let ids = references.iter().map(|r| r.locator.report_id.clone());
            let query = Query::all().in_list("id", ids).with_timeout(self.query_timeout);
            let rows = match remote.select(resource, &query).await {
                Ok(rows) => rows,
                Err(err) => {
                    report.note(format!("{resource}: {err}"));
                    continue;
                }
            };
            let mut by_id: HashMap<String, Reference> = references
                .into_iter()
                .map(|r| (r.locator.report_id.clone(), r))
                .collect();
            for row in &rows {
                let Some(id) = row_str(row, "id") else {
                    continue;
                };
                let Some(reference) = by_id.remove(id) else {
                    continue;
                };
                if let Some(inbound) = from_remote(row, &reference.locator.slug) {
                    fetched.push((inbound, reference));
                }
            }
            for missing in by_id.keys() {
                debug!(resource, report = %missing, "referenced report not found remotely");
            }
        }

        let mut parents: Vec<String> = fetched
            .iter()
            .filter_map(|(inbound, reference)| owning_job(inbound, reference))
            .filter(|job_id| !known_jobs.contains(job_id))
            .collect();
        parents.sort();
        parents.dedup();
        if !parents.is_empty() {
            info!(count = parents.len(), "fetching parent jobs outside the active set");
            let query = Query::all()
                .in_list("id", parents)
                .with_timeout(self.query_timeout);
            match remote.select("jobs", &query).await {
                Ok(rows) => {
                    for job in rows.iter().filter_map(job_from_remote) {
                        if self.write_job(&job, report).await {
                            known_jobs.insert(job.id.clone());
                        }
                    }
                }
                Err(err) => report.note(format!("parent jobs: {err}")),
            }
        }

        for (inbound, reference) in fetched {
            let Some(job_id) = owning_job(&inbound, &reference) else {
                report.note(format!("report {}: no owning job", inbound.id));
                continue;
            };
            let local = Report {
                id: inbound.id.clone(),
                job_id,
                title: reference.asset_name.clone(),
                report_type: inbound.slug.clone(),
                status: ReportStatus::Draft,
                data: Value::Object(inbound.payload),
                submitted_by: inbound.user_id,
                version: 1,
                revision_history: Value::Array(Vec::new()),
                created_at: inbound.created_at,
                updated_at: inbound.updated_at,
                dirty: false,
                last_sync_at: None,
            };
            self.write_report(&local, report).await;
        }
    }

    async fn download_form_instances(
        &self,
        remote: &dyn RemoteStore,
        job_ids: &[String],
        report: &mut DownloadReport,
    ) {
        let query = Query::all()
            .in_list("job_id", job_ids.iter().cloned())
            .with_timeout(self.query_timeout);
        let rows = match remote.select(FORM_INSTANCE_RESOURCE, &query).await {
            Ok(rows) => rows,
            Err(err) => {
                report.note(format!("form instances: {err}"));
                return;
            }
        };
        for inbound in rows.iter().filter_map(form_instance_payload) {
            let Some(job_id) = inbound.job_id.clone() else {
                report.note(format!("form instance {}: no job", inbound.id));
                continue;
            };
            let local = Report {
                id: inbound.id,
                job_id,
                title: inbound.title.unwrap_or_default(),
                report_type: inbound.slug,
                status: ReportStatus::Draft,
                data: Value::Object(inbound.payload),
                submitted_by: inbound.user_id,
                version: 1,
                revision_history: Value::Array(Vec::new()),
                created_at: inbound.created_at,
                updated_at: inbound.updated_at,
                dirty: false,
                last_sync_at: None,
            };
            self.write_report(&local, report).await;
        }
    }

    async fn write_report(&self, local: &Report, report: &mut DownloadReport) {
        match self.store.upsert_report(local, WriteOrigin::Sync).await {
            Ok(true) => report.reports += 1,
            Ok(false) => debug!(report = %local.id, "kept locally modified report"),
            Err(err) => report.note(format!("report {}: {err}", local.id)),
        }
    }
}

fn owning_job(inbound: &InboundReport, reference: &Reference) -> Option<String> {
    inbound
        .job_id
        .clone()
        .or_else(|| reference.locator.job_id.clone())
}

fn string(row: &Row, column: &str) -> Option<String> {
    row_str(row, column)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn job_from_remote(row: &Row) -> Option<Job> {
    Some(Job {
        id: string(row, "id")?,
        job_number: string(row, "job_number"),
        title: string(row, "title").unwrap_or_default(),
        description: string(row, "description"),
        status: string(row, "status").unwrap_or_else(|| ELIGIBLE_JOB_STATUS.to_string()),
        division: string(row, "division"),
        location: string(row, "location"),
        address: string(row, "address").or_else(|| string(row, "site_address")),
        start_date: string(row, "start_date"),
        due_date: string(row, "due_date"),
        priority: string(row, "priority"),
        customer_id: string(row, "customer_id"),
        customer_name: string(row, "customer_name"),
        customer_company: None,
        customer_email: None,
        customer_phone: None,
        customer_address: string(row, "customer_address"),
        notes: string(row, "notes"),
        created_at: string(row, "created_at"),
        updated_at: string(row, "updated_at"),
        dirty: false,
        last_sync_at: None,
    })
}

fn asset_from_remote(row: &Row) -> Option<Asset> {
    Some(Asset {
        id: string(row, "id")?,
        name: string(row, "name").unwrap_or_default(),
        file_url: string(row, "file_url"),
        status: string(row, "status"),
        approved_at: string(row, "approved_at"),
        sent_at: string(row, "sent_at"),
        created_at: string(row, "created_at"),
        dirty: false,
        last_sync_at: None,
    })
}

fn job_asset_from_remote(row: &Row) -> Option<JobAsset> {
    Some(JobAsset {
        id: string(row, "id")?,
        job_id: string(row, "job_id")?,
        asset_id: string(row, "asset_id")?,
        user_id: string(row, "user_id"),
        created_at: string(row, "created_at"),
        dirty: false,
        last_sync_at: None,
    })
}

fn template_from_remote(row: &Row) -> Option<ReportTemplate> {
    Some(ReportTemplate {
        id: string(row, "id")?,
        name: string(row, "name").unwrap_or_default(),
        report_type: string(row, "neta_section").unwrap_or_else(|| "custom".to_string()),
        template_data: row
            .get("structure")
            .and_then(as_object)
            .map(Value::Object)
            .unwrap_or_else(|| Value::Object(Default::default())),
        version: 1,
        is_active: row.get("is_active").and_then(Value::as_bool).unwrap_or(true),
        created_at: string(row, "created_at"),
        updated_at: string(row, "updated_at"),
    })
}
