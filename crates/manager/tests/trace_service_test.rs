use std::collections::HashSet;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tempfile::TempDir;
use tracequeue_core::{
    ProcessingReport, ReportOutcome, TraceStatus, VerboseResult, WorkerConfiguration, WorkerRef,
};
use tracequeue_infrastructure::{DatabaseManager, TraceBroker};
use tracequeue_manager::{enqueue_unprocessed, TraceQueueService};

const TRACE: &str = "20240101_120000_host";

async fn service() -> (TraceQueueService, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("queue.db").display()
    );
    let db = DatabaseManager::new(&url, 8).await.unwrap();
    let broker = TraceBroker::new(&db);
    broker.migrate().await.unwrap();
    (
        TraceQueueService::new(broker, WorkerConfiguration::default()),
        dir,
    )
}

fn report(trace_name: &str, worker: &str, result: VerboseResult) -> ProcessingReport {
    ProcessingReport::new(trace_name, WorkerRef::new(worker), result)
}

#[tokio::test]
async fn test_enqueue_is_idempotent_and_fills_defaults() {
    let (service, _dir) = service().await;

    let first = service.enqueue("trace_a.utrace", None).await.unwrap();
    assert_eq!(first.trace_name, "trace_a");
    assert_eq!(
        first.worker_configuration,
        Some(WorkerConfiguration::default())
    );

    let custom = WorkerConfiguration {
        elastic: vec!["http://es:9200".to_string()],
        dashboard: "http://dash:5050".to_string(),
    };
    let second = service.enqueue("trace_a", Some(custom)).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(service.list_queued().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_enqueue_rejects_empty_name() {
    let (service, _dir) = service().await;
    assert!(service.enqueue("  ", None).await.is_err());
}

#[tokio::test]
async fn test_single_worker_receives_traces_in_creation_order() {
    let (service, _dir) = service().await;
    let base = Utc::now() - Duration::hours(2);
    service.enqueue_at("c", None, base + Duration::minutes(2)).await.unwrap();
    service.enqueue_at("a", None, base).await.unwrap();
    service.enqueue_at("b", None, base + Duration::minutes(1)).await.unwrap();

    let mut order = Vec::new();
    while let Some(record) = service.acquire_lease("w1:30001").await.unwrap() {
        order.push(record.creation_date);
        let outcome = service
            .report_ready(report(&record.trace_name, "w1:30001", VerboseResult::success()))
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Applied);
    }

    assert_eq!(order.len(), 3);
    assert!(order.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn test_concurrent_workers_get_distinct_traces() {
    let (service, _dir) = service().await;
    for i in 0..4 {
        service.enqueue(&format!("trace_{i}"), None).await.unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..6 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.acquire_lease(&format!("w{w}:30001")).await
        }));
    }

    let mut acquired = Vec::new();
    for handle in handles {
        if let Some(record) = handle.await.unwrap().unwrap() {
            acquired.push(record.trace_name);
        }
    }

    let distinct: HashSet<_> = acquired.iter().collect();
    assert_eq!(acquired.len(), 4);
    assert_eq!(distinct.len(), 4);
    assert_eq!(service.list_in_progress().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_acquire_is_idempotent_for_same_worker() {
    let (service, _dir) = service().await;
    service.enqueue("first", None).await.unwrap();
    service.enqueue("second", None).await.unwrap();

    let a = service.acquire_lease("w1:30001").await.unwrap().unwrap();
    let b = service.acquire_lease("w1:30001").await.unwrap().unwrap();
    assert_eq!(a.trace_name, b.trace_name);
    assert_eq!(service.list_queued().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_acquire_on_empty_queue_returns_none() {
    let (service, _dir) = service().await;
    assert!(service.acquire_lease("w1:30001").await.unwrap().is_none());
}

#[tokio::test]
async fn test_release_preserves_creation_date() {
    let (service, _dir) = service().await;
    let original = service
        .enqueue_at(TRACE, None, Utc::now() - Duration::days(1))
        .await
        .unwrap();

    service.acquire_lease("w1:30001").await.unwrap().unwrap();
    let outcome = service
        .release_from_worker(report(TRACE, "w1:30001", VerboseResult::failure("sink down")))
        .await
        .unwrap();
    assert_eq!(outcome, ReportOutcome::Applied);
    assert_eq!(service.get_status(TRACE).await.unwrap(), TraceStatus::Queued);

    let again = service.acquire_lease("w2:30001").await.unwrap().unwrap();
    assert_eq!(again.creation_date, original.creation_date);
    assert!(service.list_poisoned().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_transitions() {
    let (service, _dir) = service().await;
    assert_eq!(service.get_status(TRACE).await.unwrap(), TraceStatus::NotFound);

    service.enqueue(TRACE, None).await.unwrap();
    assert_eq!(service.get_status(TRACE).await.unwrap(), TraceStatus::Queued);

    service.acquire_lease("w1:30001").await.unwrap();
    assert_eq!(
        service.get_status(&format!("{TRACE}.utrace")).await.unwrap(),
        TraceStatus::InProgress
    );

    service
        .mark_poisoned(report(TRACE, "w1:30001", VerboseResult::failure("missing file")))
        .await
        .unwrap();
    assert_eq!(service.get_status(TRACE).await.unwrap(), TraceStatus::Poisoned);

    service.enqueue("other", None).await.unwrap();
    service.acquire_lease("w1:30001").await.unwrap();
    service
        .report_ready(report("other", "w1:30001", VerboseResult::success()))
        .await
        .unwrap();
    assert_eq!(service.get_status("other").await.unwrap(), TraceStatus::Processed);
}

#[tokio::test]
async fn test_poison_requeue_ready_accumulates_reports() {
    let (service, _dir) = service().await;
    service.enqueue(TRACE, None).await.unwrap();

    service.acquire_lease("w1:30001").await.unwrap().unwrap();
    service
        .mark_poisoned(report(TRACE, "w1:30001", VerboseResult::failure("processor crashed")))
        .await
        .unwrap();

    let requeued = service.enqueue(TRACE, None).await.unwrap();
    assert_eq!(requeued.history.len(), 1);
    assert!(service.list_poisoned().await.unwrap().is_empty());

    tokio::time::sleep(StdDuration::from_millis(5)).await;
    let record = service.acquire_lease("w2:30001").await.unwrap().unwrap();
    assert_eq!(record.trace_name, TRACE);
    service
        .report_ready(report(TRACE, "w2:30001", VerboseResult::success()))
        .await
        .unwrap();

    let ready = service.list_ready().await.unwrap();
    assert_eq!(ready.len(), 1);
    let reports = &ready[0].processing_reports;
    assert_eq!(ready[0].trace_name(), TRACE);
    assert_eq!(reports.len(), 2);
    assert!(!reports[0].result.result);
    assert!(reports[1].result.result);
    assert!(reports[0].processed_date < reports[1].processed_date);
    assert!(ready[0].trace.history.is_empty());
}

#[tokio::test]
async fn test_enqueue_of_leased_trace_returns_lease() {
    let (service, _dir) = service().await;
    service.enqueue(TRACE, None).await.unwrap();
    let leased = service.acquire_lease("w1:30001").await.unwrap().unwrap();

    let record = service.enqueue(TRACE, None).await.unwrap();
    assert_eq!(record, leased);
    assert_eq!(service.get_status(TRACE).await.unwrap(), TraceStatus::InProgress);
}

#[tokio::test]
async fn test_stale_reports_are_ignored() {
    let (service, _dir) = service().await;
    service.enqueue(TRACE, None).await.unwrap();
    service.acquire_lease("w1:30001").await.unwrap();

    let outcome = service
        .mark_poisoned(report(TRACE, "w2:30001", VerboseResult::failure("not mine")))
        .await
        .unwrap();
    assert_eq!(outcome, ReportOutcome::Stale);
    assert_eq!(service.get_status(TRACE).await.unwrap(), TraceStatus::InProgress);

    let outcome = service
        .report_ready(report("never_leased", "w1:30001", VerboseResult::success()))
        .await
        .unwrap();
    assert_eq!(outcome, ReportOutcome::Stale);
    assert_eq!(
        service.get_status("never_leased").await.unwrap(),
        TraceStatus::NotFound
    );
}

#[tokio::test]
async fn test_drop_queued() {
    let (service, _dir) = service().await;
    service.enqueue(TRACE, None).await.unwrap();
    assert!(service.drop_queued(TRACE).await.unwrap());
    assert!(!service.drop_queued(TRACE).await.unwrap());
    assert_eq!(service.get_status(TRACE).await.unwrap(), TraceStatus::NotFound);
}

#[tokio::test]
async fn test_enqueue_unprocessed_skips_known_traces() {
    let (service, _dir) = service().await;
    let traces = tempfile::tempdir().unwrap();
    for name in ["new_a", "new_b", "done", "broken", "skipme"] {
        std::fs::write(traces.path().join(format!("{name}.utrace")), b"trace").unwrap();
    }
    std::fs::write(traces.path().join("readme.md"), b"docs").unwrap();

    service.enqueue("done", None).await.unwrap();
    service.acquire_lease("w1:30001").await.unwrap();
    service
        .report_ready(report("done", "w1:30001", VerboseResult::success()))
        .await
        .unwrap();
    service.enqueue("broken", None).await.unwrap();
    service.acquire_lease("w1:30001").await.unwrap();
    service
        .mark_poisoned(report("broken", "w1:30001", VerboseResult::failure("bad")))
        .await
        .unwrap();

    let enqueued = enqueue_unprocessed(&service, traces.path(), &["skipme".to_string()])
        .await
        .unwrap();

    assert_eq!(enqueued, 3);
    assert_eq!(service.get_status("new_a").await.unwrap(), TraceStatus::Queued);
    assert_eq!(service.get_status("broken").await.unwrap(), TraceStatus::Queued);
    assert_eq!(service.get_status("done").await.unwrap(), TraceStatus::Processed);
    assert_eq!(service.get_status("skipme").await.unwrap(), TraceStatus::NotFound);
}
