use std::sync::Arc;
use std::time::Duration;

use fieldsync_core::RestClient;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use wiremock::matchers::{any, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::sync::outbox::{OperationKind, SyncTable};
use crate::sync::store::{Asset, Job, JobAsset, Report, ReportStatus, WriteOrigin};

async fn make_store() -> LocalStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = LocalStore::from_pool(pool);
    store.init().await.unwrap();
    store
}

fn engine(store: LocalStore, server: &MockServer) -> SyncEngine {
    let client = RestClient::new(&server.uri(), "anon-key")
        .unwrap()
        .with_schema("neta_ops");
    let remote: Arc<dyn RemoteStore> = Arc::new(client);
    SyncEngine::new(store, Some(remote)).with_query_timeout(Duration::from_secs(5))
}

fn job(id: &str) -> Job {
    Job {
        id: id.into(),
        title: format!("Job {id}"),
        status: "in_progress".into(),
        ..Job::default()
    }
}

async fn mount_empty_fallback(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .with_priority(10)
        .mount(server)
        .await;
}

/// One active job with a report referenced through an asset locator.
async fn mount_remote_fixture(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/custom_form_templates"))
        .and(query_param("is_active", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "T1",
                "name": "Megger sheet",
                "neta_section": "7.1",
                "structure": "{\"fields\":[]}",
                "is_active": true
            }
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/jobs"))
        .and(query_param("status", "eq.in_progress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "J1",
                "title": "Substation A",
                "status": "in_progress",
                "customer_id": "C1",
                "site_address": "1 Grid Rd",
                "created_at": "2026-01-02T08:00:00Z"
            }
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/customers"))
        .and(header("accept-profile", "common"))
        .and(query_param("id", "in.(C1)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "C1", "company_name": "Acme Power", "phone": "555-0100" }
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/job_assets"))
        .and(query_param("job_id", "in.(J1)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "L1", "job_id": "J1", "asset_id": "A1", "created_at": "2026-01-02T09:00:00Z" }
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/assets"))
        .and(query_param("id", "in.(A1)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "A1",
                "name": "Panel LP-1",
                "file_url": "report:/jobs/J1/panelboard-report/R1?foo=bar",
                "created_at": "2026-01-02T09:00:00Z"
            }
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/panelboard_reports"))
        .and(query_param("id", "in.(R1)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "R1",
                "user_id": "tech-7",
                "created_at": "2026-01-02T10:00:00Z",
                "report_info": { "customer": "Acme Power", "location": "Bay 3" }
            }
        ])))
        .expect(1..)
        .mount(server)
        .await;
    mount_empty_fallback(server).await;
}

#[tokio::test]
async fn locator_reference_downloads_report_with_slug_and_job() {
    let server = MockServer::start().await;
    mount_remote_fixture(&server).await;
    let engine = engine(make_store().await, &server);

    let report = engine.full_sync(SyncOptions::default()).await;

    assert!(report.success, "{report:?}");
    assert_eq!(report.jobs, 1);
    assert_eq!(report.reports, 1);
    assert_eq!(report.assets, 1);
    assert_eq!(report.templates, 1);
    let stored = engine.store().get_report("R1").await.unwrap().unwrap();
    assert_eq!(stored.report_type, "panelboard-report");
    assert_eq!(stored.job_id, "J1");
    assert_eq!(stored.title, "Panel LP-1");
    assert_eq!(stored.status, ReportStatus::Draft);
    assert_eq!(stored.submitted_by.as_deref(), Some("tech-7"));
    assert_eq!(stored.data["location"], "Bay 3");
    assert!(!stored.dirty);
}

#[tokio::test]
async fn customers_are_denormalized_onto_jobs() {
    let server = MockServer::start().await;
    mount_remote_fixture(&server).await;
    let engine = engine(make_store().await, &server);

    engine.full_sync(SyncOptions::default()).await;

    let stored = engine.store().get_job("J1").await.unwrap().unwrap();
    assert_eq!(stored.customer_name.as_deref(), Some("Acme Power"));
    assert_eq!(stored.customer_phone.as_deref(), Some("555-0100"));
    assert_eq!(stored.customer_address.as_deref(), Some("1 Grid Rd"));
}

#[tokio::test]
async fn full_resync_is_idempotent() {
    let server = MockServer::start().await;
    mount_remote_fixture(&server).await;
    let engine = engine(make_store().await, &server);

    async fn contents(store: &LocalStore) -> (Vec<Job>, Vec<Report>, Vec<Asset>, Vec<JobAsset>, Vec<String>) {
        let mut jobs = store.list_jobs().await.unwrap();
        jobs.iter_mut().for_each(|j| j.last_sync_at = None);
        let mut reports = store.list_reports(None).await.unwrap();
        reports.iter_mut().for_each(|r| r.last_sync_at = None);
        let mut assets = store.list_assets().await.unwrap();
        assets.iter_mut().for_each(|a| a.last_sync_at = None);
        let mut links = store.list_job_assets().await.unwrap();
        links.iter_mut().for_each(|l| l.last_sync_at = None);
        let templates = store
            .list_templates()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        (jobs, reports, assets, links, templates)
    }

    assert!(engine.full_sync(SyncOptions::default()).await.success);
    let first = contents(engine.store()).await;
    assert!(engine.full_sync(SyncOptions::default()).await.success);
    let second = contents(engine.store()).await;

    assert_eq!(first, second);
    assert_eq!(first.0.len(), 1);
    assert_eq!(first.1.len(), 1);
}

#[tokio::test]
async fn foreign_parent_job_is_written_before_its_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/jobs"))
        .and(query_param("status", "eq.in_progress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "J1", "title": "Active", "status": "in_progress" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/job_assets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "L1", "job_id": "J1", "asset_id": "A1" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/assets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "A1", "name": "Carried over", "file_url": "report:/jobs/J9/panelboard-report/R2" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/panelboard_reports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "R2", "job_id": "J9", "report_info": { "customer": "Globex" } }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/jobs"))
        .and(query_param("id", "in.(J9)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "J9", "title": "Closed last week", "status": "completed" }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;
    let engine = engine(make_store().await, &server);

    let report = engine.full_sync(SyncOptions::default()).await;

    assert!(report.success, "{report:?}");
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let parent = engine.store().get_job("J9").await.unwrap().unwrap();
    assert_eq!(parent.status, "completed");
    let stored = engine.store().get_report("R2").await.unwrap().unwrap();
    assert_eq!(stored.job_id, "J9");
}

#[tokio::test]
async fn unknown_locator_slug_is_skipped_without_a_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "J1", "title": "Active", "status": "in_progress" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/job_assets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "L1", "job_id": "J1", "asset_id": "A1" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/assets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "A1", "name": "Mystery", "file_url": "report:/jobs/J1/not-a-report-type/R3" }
        ])))
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;
    let engine = engine(make_store().await, &server);

    let report = engine.full_sync(SyncOptions::default()).await;

    assert!(report.success);
    assert_eq!(report.reports, 0);
    assert_eq!(report.assets, 1);
    let requested: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(!requested.iter().any(|p| p.contains("not")));
}

#[tokio::test]
async fn form_instances_become_reports() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "J1", "title": "Active", "status": "in_progress" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/custom_form_instances"))
        .and(query_param("job_id", "in.(J1)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "F1",
                "job_id": "J1",
                "template_id": "T1",
                "template_name": "Megger sheet",
                "data": { "reading": 42 }
            }
        ])))
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;
    let engine = engine(make_store().await, &server);

    let report = engine.full_sync(SyncOptions::default()).await;

    assert_eq!(report.reports, 1);
    let stored = engine.store().get_report("F1").await.unwrap().unwrap();
    assert_eq!(stored.job_id, "J1");
    assert_eq!(stored.data["template_id"], "T1");
    assert_eq!(stored.data["reading"], 42);
}

#[tokio::test]
async fn job_fetch_failure_aborts_without_clearing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/jobs"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "db down" })))
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;
    let store = make_store().await;
    store.upsert_job(&job("J-old"), WriteOrigin::Sync).await.unwrap();
    let engine = engine(store, &server);

    let report = engine.full_sync(SyncOptions::default()).await;

    assert!(!report.success);
    assert!(report.message.unwrap().contains("job fetch failed"));
    assert!(engine.store().get_job("J-old").await.unwrap().is_some());
    assert!(
        engine
            .store()
            .get_setting(LAST_FULL_SYNC_KEY)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn slow_job_fetch_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/jobs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;
    let engine = engine(make_store().await, &server).with_query_timeout(Duration::from_millis(200));

    let started = std::time::Instant::now();
    let report = engine.full_sync(SyncOptions::default()).await;

    assert!(!report.success);
    assert!(report.message.unwrap().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn successful_sync_records_last_full_sync() {
    let server = MockServer::start().await;
    mount_empty_fallback(&server).await;
    let engine = engine(make_store().await, &server);

    assert!(engine.full_sync(SyncOptions::default()).await.success);

    assert!(
        engine
            .store()
            .get_setting(LAST_FULL_SYNC_KEY)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn missing_credentials_fail_the_sync() {
    let engine = SyncEngine::new(make_store().await, None);

    let report = engine.full_sync(SyncOptions::default()).await;

    assert!(!report.success);
    assert_eq!(report.message.as_deref(), Some(MISSING_CREDENTIALS));
    assert!(!engine.upload_only().await.success);
}

#[tokio::test]
async fn second_sync_while_running_returns_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/jobs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;
    let engine = engine(make_store().await, &server);

    let (first, second) = tokio::join!(engine.full_sync(SyncOptions::default()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.full_sync(SyncOptions::default()).await
    });

    assert!(first.success);
    assert!(!second.success);
    assert_eq!(second.message.as_deref(), Some(ALREADY_RUNNING));
}

#[tokio::test]
async fn unmapped_slug_entry_fails_without_network() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let store = make_store().await;
    store.upsert_job(&job("J1"), WriteOrigin::Sync).await.unwrap();
    let report = Report::draft("R1", "J1", "unmapped-slug");
    store.upsert_report(&report, WriteOrigin::Local).await.unwrap();
    store
        .enqueue(SyncTable::Reports, "R1", OperationKind::Update, None)
        .await
        .unwrap();
    let engine = engine(store, &server);

    let result = engine.upload_only().await;

    assert!(result.success);
    assert_eq!(result.upload_failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("unmapped-slug"));
    let entries = engine.store().pending_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].retry_count, 1);
    assert!(engine.store().get_report("R1").await.unwrap().unwrap().dirty);
}

#[tokio::test]
async fn delivered_entry_is_removed_and_record_cleaned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/panelboard_reports"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    let store = make_store().await;
    store.upsert_job(&job("J1"), WriteOrigin::Sync).await.unwrap();
    let mut draft = Report::draft("R1", "J1", "panelboard-report");
    draft.data = json!({ "customer": "Acme" });
    store.create_report(&draft).await.unwrap();
    let engine = engine(store, &server);

    let result = engine.upload_only().await;

    assert_eq!(result.uploaded, 1);
    assert!(engine.store().pending_entries().await.unwrap().is_empty());
    let stored = engine.store().get_report("R1").await.unwrap().unwrap();
    assert!(!stored.dirty);
    assert!(stored.last_sync_at.is_some());
}

#[tokio::test]
async fn failed_entry_stays_queued_and_later_entries_still_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/panelboard_reports"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "boom" })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/jobs"))
        .and(query_param("id", "eq.J1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "J1" }])))
        .expect(1)
        .mount(&server)
        .await;
    let store = make_store().await;
    store.upsert_job(&job("J1"), WriteOrigin::Sync).await.unwrap();
    store
        .create_report(&Report::draft("R1", "J1", "panelboard-report"))
        .await
        .unwrap();
    store.update_job_status("J1", "completed").await.unwrap();
    let engine = engine(store, &server);

    let result = engine.upload_only().await;

    assert_eq!(result.uploaded + result.upload_failed, 2);
    assert_eq!(result.uploaded, 1);
    assert_eq!(result.upload_failed, 1);
    let entries = engine.store().pending_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].record_id, "R1");
    assert_eq!(entries[0].retry_count, 1);
    assert!(entries[0].last_error.as_deref().unwrap().contains("boom"));
    assert!(engine.store().get_report("R1").await.unwrap().unwrap().dirty);
    assert!(!engine.store().get_job("J1").await.unwrap().unwrap().dirty);
}

#[tokio::test]
async fn rejected_credentials_end_the_upload_phase() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/panelboard_reports"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "JWT expired" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "J1" }])))
        .expect(0)
        .mount(&server)
        .await;
    let store = make_store().await;
    store.upsert_job(&job("J1"), WriteOrigin::Sync).await.unwrap();
    store
        .create_report(&Report::draft("R1", "J1", "panelboard-report"))
        .await
        .unwrap();
    store.update_job_status("J1", "completed").await.unwrap();
    let engine = engine(store, &server);

    let result = engine.upload_only().await;

    assert!(!result.success);
    assert!(result.message.unwrap().contains("credentials"));
    let entries = engine.store().pending_entries().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].retry_count, 1);
    assert_eq!(entries[1].retry_count, 0);
}

#[tokio::test]
async fn locally_deleted_report_stays_deleted_across_resync() {
    let server = MockServer::start().await;
    mount_remote_fixture(&server).await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/panelboard_reports"))
        .and(query_param("id", "eq.R1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let engine = engine(make_store().await, &server);
    assert!(engine.full_sync(SyncOptions::default()).await.success);
    assert!(engine.store().get_report("R1").await.unwrap().is_some());

    engine.store().delete_report("R1").await.unwrap();
    let report = engine.full_sync(SyncOptions::default()).await;

    assert!(report.success, "{report:?}");
    assert_eq!(report.uploaded, 1);
    assert!(engine.store().get_report("R1").await.unwrap().is_none());
    assert!(engine.store().pending_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn form_instance_report_uploads_to_instance_resource() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/custom_form_instances"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    let store = make_store().await;
    store.upsert_job(&job("J1"), WriteOrigin::Sync).await.unwrap();
    let mut draft = Report::draft("F1", "J1", "7.1");
    draft.data = json!({ "template_id": "T1", "template_name": "Megger sheet", "reading": 42 });
    store.create_report(&draft).await.unwrap();
    let engine = engine(store, &server);

    let result = engine.upload_only().await;

    assert_eq!(result.uploaded, 1, "{:?}", result.errors);
}

#[tokio::test]
async fn status_and_discard_operate_on_the_queue() {
    let store = make_store().await;
    let id = store
        .enqueue(SyncTable::Jobs, "J1", OperationKind::Delete, None)
        .await
        .unwrap();
    let engine = SyncEngine::new(store, None);

    assert_eq!(engine.status().await.unwrap().pending, 1);
    assert!(engine.discard_entry(id).await.unwrap());
    assert_eq!(engine.status().await.unwrap().pending, 0);
}
