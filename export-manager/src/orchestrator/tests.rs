//! Orchestrator tests with stub adapters and an in-memory dataset

use super::*;
use crate::adapters::{ObjectAdapter, SpoolTransport};
use crate::render::Row;
use async_trait::async_trait;
use dataport::activity::ActivityLog;
use dataport::credentials::{Cipher, TokenStore};
use dataport::destination::{DestinationStore, ExportFormat, NewDestination, StorageType};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tempfile::TempDir;

struct StaticDataset;

#[async_trait]
impl DatasetSource for StaticDataset {
    async fn rows(&self, _destination: &dataport::destination::Destination) -> anyhow::Result<Vec<Row>> {
        let rows = serde_json::json!([{"id": 1, "region": "eu"}, {"id": 2, "region": "us"}]);
        Ok(serde_json::from_value(rows)?)
    }
}

enum Behaviour {
    Succeed,
    Fail,
    Sleep(Duration),
    Panic,
    Hang(Arc<AtomicBool>),
}

/// Sets its flag when the adapter future holding it is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct StubAdapter {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl StubAdapter {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ExportAdapter for StubAdapter {
    fn storage_type(&self) -> StorageType {
        StorageType::CustomApi
    }

    async fn export(&self, job: &ExportJob, payload: &Payload) -> ExportOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Succeed => {
                ExportOutcome::success(format!("https://hooks.example.com/{}", job.file_name), payload.size())
            }
            Behaviour::Fail => ExportOutcome::failure("Transport failure: connection refused"),
            Behaviour::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                ExportOutcome::success("https://hooks.example.com/slow", payload.size())
            }
            Behaviour::Panic => panic!("adapter bug"),
            Behaviour::Hang(dropped) => {
                let _flag = DropFlag(dropped.clone());
                std::future::pending::<ExportOutcome>().await
            }
        }
    }
}

struct Harness {
    orchestrator: ExportOrchestrator,
    lifecycle: Arc<LifecycleManager>,
    log: Arc<ActivityLog>,
}

fn harness(adapter: Arc<dyn ExportAdapter>) -> Harness {
    let cipher = Cipher::from_bytes(&[4u8; 32]).unwrap();
    let log = Arc::new(ActivityLog::new(":memory:").unwrap());
    let store = Arc::new(DestinationStore::new(":memory:", cipher.clone()).unwrap());
    let lifecycle = Arc::new(LifecycleManager::new(store, log.clone()));
    let tokens = Arc::new(TokenStore::new(":memory:", cipher).unwrap());
    let registry = Arc::new(AdapterRegistry::new(tokens).with_adapter(adapter));
    let logs = Arc::new(ExportLogStore::new(":memory:").unwrap());

    Harness {
        orchestrator: ExportOrchestrator::new(
            lifecycle.clone(),
            logs,
            registry,
            Arc::new(StaticDataset),
            log.clone(),
        ),
        lifecycle,
        log,
    }
}

async fn create_destination(h: &Harness, ctx: &RequestContext, export_format: ExportFormat) -> String {
    let config = serde_json::json!({"baseUrl": "https://hooks.example.com"});
    h.lifecycle
        .create(
            ctx,
            NewDestination {
                name: "Nightly webhook".to_string(),
                storage_type: Some("custom_api".to_string()),
                export_format: Some(export_format),
                config: config.as_object().cloned().unwrap_or_default(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id
}

async fn wait_terminal(h: &Harness, ctx: &RequestContext, export_id: &str) -> ExportLog {
    for _ in 0..200 {
        let log = h.orchestrator.get_export(ctx, export_id).await.unwrap();
        if log.status.is_terminal() {
            return log;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("export {} never reached a terminal status", export_id);
}

fn event_types(h: &Harness, destination_id: &str) -> Vec<String> {
    h.log
        .list_by_destination(destination_id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

#[tokio::test]
async fn test_request_returns_before_slow_adapter_finishes() {
    let h = harness(StubAdapter::new(Behaviour::Sleep(Duration::from_secs(5))));
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Csv).await;

    let started = Instant::now();
    let requested = h.orchestrator.request_export(&ctx, &id).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(requested.status, ExportStatus::InProgress);

    let log = h.orchestrator.get_export(&ctx, &requested.export_id).await.unwrap();
    assert_eq!(log.status, ExportStatus::InProgress);
    assert_eq!(h.orchestrator.in_flight(), 1);

    let report = h.orchestrator.shutdown(Duration::from_millis(50)).await;
    assert_eq!(report.aborted, 1);
}

#[tokio::test]
async fn test_export_aborted_at_deadline_is_closed_as_failed() {
    let h = harness(StubAdapter::new(Behaviour::Sleep(Duration::from_secs(30))));
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Csv).await;
    let requested = h.orchestrator.request_export(&ctx, &id).await.unwrap();

    let report = h.orchestrator.shutdown(Duration::from_millis(20)).await;
    assert_eq!(report.aborted, 1);

    let log = h.orchestrator.get_export(&ctx, &requested.export_id).await.unwrap();
    assert_eq!(log.status, ExportStatus::Failed);
    assert!(log.error_message.unwrap().contains("aborted by shutdown"));
    assert!(event_types(&h, &id).contains(&"export_failed".to_string()));
}

#[tokio::test]
async fn test_shutdown_abort_stops_the_adapter() {
    let dropped = Arc::new(AtomicBool::new(false));
    let adapter = StubAdapter::new(Behaviour::Hang(dropped.clone()));
    let h = harness(adapter.clone());
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Csv).await;
    h.orchestrator.request_export(&ctx, &id).await.unwrap();

    for _ in 0..100 {
        if adapter.calls.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

    let report = h.orchestrator.shutdown(Duration::from_millis(20)).await;
    assert_eq!(report.aborted, 1);

    for _ in 0..100 {
        if dropped.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("adapter kept running after its export was aborted");
}

#[tokio::test]
async fn test_successful_export_marks_destination_active() {
    let adapter = StubAdapter::new(Behaviour::Succeed);
    let h = harness(adapter.clone());
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Json).await;

    let requested = h.orchestrator.request_export(&ctx, &id).await.unwrap();
    let log = wait_terminal(&h, &ctx, &requested.export_id).await;

    assert_eq!(log.status, ExportStatus::Success);
    assert!(log.file_url.unwrap().ends_with(".json"));
    assert!(log.file_size.unwrap() > 0);
    assert_eq!(log.correlation_id, ctx.correlation_id);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

    // Terminal write and status update happen before the audit entry
    h.orchestrator.shutdown(Duration::from_secs(1)).await;
    let destination = h.lifecycle.get(&ctx, &id).await.unwrap();
    assert_eq!(destination.status, DestinationStatus::Active);

    let events = event_types(&h, &id);
    assert!(events.contains(&"export_requested".to_string()));
    assert!(events.contains(&"export_completed".to_string()));
}

#[tokio::test]
async fn test_failed_export_leaves_destination_status() {
    let h = harness(StubAdapter::new(Behaviour::Fail));
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Csv).await;

    let requested = h.orchestrator.request_export(&ctx, &id).await.unwrap();
    let log = wait_terminal(&h, &ctx, &requested.export_id).await;

    assert_eq!(log.status, ExportStatus::Failed);
    assert!(log.error_message.unwrap().contains("connection refused"));
    assert!(log.file_url.is_none());

    h.orchestrator.shutdown(Duration::from_secs(1)).await;
    let destination = h.lifecycle.get(&ctx, &id).await.unwrap();
    assert_eq!(destination.status, DestinationStatus::Pending);
    assert!(event_types(&h, &id).contains(&"export_failed".to_string()));
}

#[tokio::test]
async fn test_concurrent_exports_get_distinct_terminal_logs() {
    let h = harness(StubAdapter::new(Behaviour::Sleep(Duration::from_millis(30))));
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Csv).await;

    let (first, second) = tokio::join!(
        h.orchestrator.request_export(&ctx, &id),
        h.orchestrator.request_export(&ctx, &id)
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_ne!(first.export_id, second.export_id);

    assert!(wait_terminal(&h, &ctx, &first.export_id).await.status.is_terminal());
    assert!(wait_terminal(&h, &ctx, &second.export_id).await.status.is_terminal());

    let history = h.orchestrator.list_exports(&ctx, &id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_late_terminal_write_is_ignored() {
    let h = harness(StubAdapter::new(Behaviour::Succeed));
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Csv).await;

    let requested = h.orchestrator.request_export(&ctx, &id).await.unwrap();
    wait_terminal(&h, &ctx, &requested.export_id).await;
    h.orchestrator.shutdown(Duration::from_secs(1)).await;

    h.orchestrator
        .finish(&ctx, &requested.export_id, &id, ExportOutcome::failure("late writer"))
        .await;

    let log = h.orchestrator.get_export(&ctx, &requested.export_id).await.unwrap();
    assert_eq!(log.status, ExportStatus::Success);
    assert!(log.error_message.is_none());
    assert!(!event_types(&h, &id).contains(&"export_failed".to_string()));
}

#[tokio::test]
async fn test_panicking_adapter_fails_the_export() {
    let h = harness(StubAdapter::new(Behaviour::Panic));
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Csv).await;

    let requested = h.orchestrator.request_export(&ctx, &id).await.unwrap();
    let log = wait_terminal(&h, &ctx, &requested.export_id).await;

    assert_eq!(log.status, ExportStatus::Failed);
    assert!(log.error_message.unwrap().contains("panicked"));
}

#[tokio::test]
async fn test_parquet_destination_fails_with_message() {
    let adapter = StubAdapter::new(Behaviour::Succeed);
    let h = harness(adapter.clone());
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Parquet).await;

    let requested = h.orchestrator.request_export(&ctx, &id).await.unwrap();
    let log = wait_terminal(&h, &ctx, &requested.export_id).await;

    assert_eq!(log.status, ExportStatus::Failed);
    assert!(log.error_message.unwrap().contains("Parquet"));
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_deleted_destination_is_rejected() {
    let h = harness(StubAdapter::new(Behaviour::Succeed));
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Csv).await;
    h.lifecycle.soft_delete(&ctx, &id).await.unwrap();

    let err = h.orchestrator.request_export(&ctx, &id).await.unwrap_err();
    assert_eq!(err.kind(), "precondition_failed");
    assert!(h.orchestrator.list_exports(&ctx, &id).await.unwrap().is_empty());
    assert!(event_types(&h, &id).contains(&"export_request_error".to_string()));
}

#[tokio::test]
async fn test_other_owner_gets_not_found() {
    let h = harness(StubAdapter::new(Behaviour::Succeed));
    let alice = RequestContext::new("alice");
    let bob = RequestContext::new("bob");
    let id = create_destination(&h, &alice, ExportFormat::Csv).await;

    let err = h.orchestrator.request_export(&bob, &id).await.unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let requested = h.orchestrator.request_export(&alice, &id).await.unwrap();
    let err = h
        .orchestrator
        .get_export(&bob, &requested.export_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
    assert_eq!(
        h.orchestrator.list_exports(&bob, &id).await.unwrap_err().kind(),
        "not_found"
    );
}

#[tokio::test]
async fn test_request_after_shutdown_closes_the_log() {
    let h = harness(StubAdapter::new(Behaviour::Succeed));
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Csv).await;
    h.orchestrator.shutdown(Duration::from_millis(10)).await;

    let err = h.orchestrator.request_export(&ctx, &id).await.unwrap_err();
    assert_eq!(err.kind(), "precondition_failed");

    let history = h.orchestrator.list_exports(&ctx, &id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExportStatus::Failed);
}

#[tokio::test]
async fn test_requested_event_carries_export_id() {
    let h = harness(StubAdapter::new(Behaviour::Succeed));
    let ctx = RequestContext::new("user1");
    let id = create_destination(&h, &ctx, ExportFormat::Csv).await;

    let requested = h.orchestrator.request_export(&ctx, &id).await.unwrap();
    let entry = h
        .log
        .list_by_destination(&id)
        .unwrap()
        .into_iter()
        .find(|e| e.event_type == "export_requested")
        .unwrap();
    let details: Value = entry.details.unwrap();
    assert_eq!(details["export_id"], requested.export_id.as_str());
    assert_eq!(details["storage_type"], "custom_api");
}

/// Two exports of one destination started in the same second land in
/// separate objects.
#[tokio::test]
async fn test_concurrent_s3_exports_write_distinct_objects() {
    let spool = TempDir::new().unwrap();
    let h = harness(Arc::new(ObjectAdapter::new(
        StorageType::AwsS3,
        Arc::new(SpoolTransport::new(spool.path())),
    )));
    let ctx = RequestContext::new("user1");
    let config = serde_json::json!({
        "accessKey": "AKIAEXAMPLE",
        "secretKey": "wJalrXUtnFEMI",
        "bucket": "bk",
        "region": "eu-west-1",
        "prefix": "daily"
    });
    let id = h
        .lifecycle
        .create(
            &ctx,
            NewDestination {
                name: "Daily".to_string(),
                storage_type: Some("aws_s3".to_string()),
                config: config.as_object().cloned().unwrap_or_default(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id;

    let (first, second) = tokio::join!(
        h.orchestrator.request_export(&ctx, &id),
        h.orchestrator.request_export(&ctx, &id)
    );
    let first = wait_terminal(&h, &ctx, &first.unwrap().export_id).await;
    let second = wait_terminal(&h, &ctx, &second.unwrap().export_id).await;
    h.orchestrator.shutdown(Duration::from_secs(1)).await;

    assert_eq!(first.status, ExportStatus::Success);
    assert_eq!(second.status, ExportStatus::Success);
    assert_ne!(first.file_url, second.file_url);

    let spooled = std::fs::read_dir(spool.path().join("s3/bk/daily")).unwrap().count();
    assert_eq!(spooled, 2);
}
