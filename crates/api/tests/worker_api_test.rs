use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use tracequeue_api::{create_worker_app, WorkerNodeState};
use tracequeue_config::ExportConfig;
use tracequeue_core::{CancellationToken, ProcessingReport, TraceRecord};
use tracequeue_worker::{
    ExportBatch, ManagerApi, ManagerCallError, MetricsBuffer, MetricsSink, ProcessorError,
    SinkError, TraceProcessor, WorkLoop, WorkLoopSettings, WorkerLifecycle, WorkerState,
};

struct EmptyQueue;

#[async_trait]
impl ManagerApi for EmptyQueue {
    async fn acquire(&self, _worker_url: &str) -> Result<Option<TraceRecord>, ManagerCallError> {
        Ok(None)
    }

    async fn report_ready(&self, _report: &ProcessingReport) -> Result<(), ManagerCallError> {
        Ok(())
    }

    async fn mark_poisoned(&self, _report: &ProcessingReport) -> Result<(), ManagerCallError> {
        Ok(())
    }

    async fn release(&self, _report: &ProcessingReport) -> Result<(), ManagerCallError> {
        Ok(())
    }
}

struct NoopProcessor;

#[async_trait]
impl TraceProcessor for NoopProcessor {
    async fn process(
        &self,
        _trace_name: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), ProcessorError> {
        Ok(())
    }
}

struct NoopSink;

#[async_trait]
impl MetricsSink for NoopSink {
    async fn export(&self, _hosts: &[String], _batch: &ExportBatch) -> Result<usize, SinkError> {
        Ok(0)
    }
}

fn app() -> (Router, Arc<WorkerLifecycle>, MetricsBuffer) {
    let buffer = MetricsBuffer::new();
    let state = WorkerState::new("w1:30001");
    let settings = WorkLoopSettings {
        poll_interval: Duration::from_millis(10),
        retry_delay: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(1),
        trace_sessions_dir: std::env::temp_dir(),
        export: ExportConfig::default(),
    };
    let work_loop = WorkLoop::new(
        Arc::new(EmptyQueue),
        Arc::new(NoopProcessor),
        Arc::new(NoopSink),
        buffer.clone(),
        state.clone(),
        settings,
    );
    let lifecycle = Arc::new(WorkerLifecycle::new(
        Arc::new(work_loop),
        state,
        Duration::from_secs(1),
    ));
    let app = create_worker_app(WorkerNodeState {
        lifecycle: Arc::clone(&lifecycle),
        buffer: buffer.clone(),
    });
    (app, lifecycle, buffer)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_status_and_reset() {
    let (app, lifecycle, _buffer) = app();

    let (status, body) = call(&app, "GET", "/worker/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "w1:30001");
    assert_eq!(body["status"], "idle");

    let (status, body) = call(&app, "GET", "/worker/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(lifecycle.is_running().await);

    let (_, body) = call(&app, "GET", "/ping", None).await;
    assert_eq!(body["running"], true);

    lifecycle.stop().await.unwrap();
    let (_, body) = call(&app, "GET", "/worker/status", None).await;
    assert_eq!(body["status"], "offline");
}

#[tokio::test]
async fn test_metrics_receiver_fills_buffer() {
    let (app, _lifecycle, buffer) = app();

    let pushes = [
        (
            "/performance_metrics/set/perf_config",
            json!({ "Game": { "Tick_Budgets": 16.6 }, "Name": "default" }),
        ),
        (
            "/performance_metrics/set/bookmarks",
            json!([{ "METADATA:version:1.2.3.4-main": 0.0 }, { "Start": 1000.0 }]),
        ),
        (
            "/performance_metrics/set/header",
            json!({ "MetricFramesCount": 2 }),
        ),
        (
            "/performance_metrics/add",
            json!([
                { "FrameStart": 1000.0, "FrameEnd": 1016.0, "Game": { "Tick_Value": 12.0 } },
                { "FrameStart": 1016.0, "FrameEnd": 1033.0, "Game": { "Tick_Value": 14.0 } }
            ]),
        ),
    ];
    for (uri, body) in pushes {
        let (status, _) = call(&app, "POST", uri, Some(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{uri}");
    }

    let snapshot = buffer.snapshot().await;
    assert!(snapshot.is_available());
    assert_eq!(snapshot.metric_names, vec!["Game_Tick".to_string()]);
    assert_eq!(snapshot.metadata_names, vec!["version".to_string()]);
    assert_eq!(snapshot.bookmarks.len(), 2);
    assert_eq!(snapshot.frames[1].data["Game_Tick"], json!(14.0));

    let (status, _) = call(
        &app,
        "POST",
        "/performance_metrics/set/metadata_names",
        Some(json!(["branch"])),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(buffer.snapshot().await.metadata_names, vec!["branch".to_string()]);
}
