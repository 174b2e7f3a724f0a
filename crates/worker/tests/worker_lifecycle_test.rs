use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracequeue_config::ExportConfig;
use tracequeue_core::{CancellationToken, ProcessingReport, TraceRecord, WorkerStatus};
use tracequeue_worker::{
    ExportBatch, ManagerApi, ManagerCallError, MetricsBuffer, MetricsSink, ProcessorError,
    SinkError, TraceProcessor, WorkLoop, WorkLoopSettings, WorkerLifecycle, WorkerState,
};

/// 队列始终为空的Manager，记录获取次数
#[derive(Default)]
struct EmptyQueue {
    polls: AtomicUsize,
}

#[async_trait]
impl ManagerApi for EmptyQueue {
    async fn acquire(&self, _worker_url: &str) -> Result<Option<TraceRecord>, ManagerCallError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
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
    async fn export(&self, _hosts: &[String], batch: &ExportBatch) -> Result<usize, SinkError> {
        Ok(batch.documents.len())
    }
}

fn lifecycle(manager: Arc<EmptyQueue>) -> WorkerLifecycle {
    let state = WorkerState::new("w1:30001");
    let settings = WorkLoopSettings {
        poll_interval: Duration::from_millis(10),
        retry_delay: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(1),
        trace_sessions_dir: std::env::temp_dir(),
        export: ExportConfig::default(),
    };
    let work_loop = WorkLoop::new(
        manager,
        Arc::new(NoopProcessor),
        Arc::new(NoopSink),
        MetricsBuffer::new(),
        state.clone(),
        settings.clone(),
    );
    WorkerLifecycle::new(Arc::new(work_loop), state, settings.shutdown_grace)
}

#[tokio::test]
async fn test_start_polls_until_stopped() {
    let manager = Arc::new(EmptyQueue::default());
    let lifecycle = lifecycle(Arc::clone(&manager));

    lifecycle.start().await.unwrap();
    assert!(lifecycle.is_running().await);
    assert!(lifecycle.start().await.is_err());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(manager.polls.load(Ordering::SeqCst) > 1);
    assert_eq!(lifecycle.state().snapshot().await.status, WorkerStatus::Idle);

    lifecycle.stop().await.unwrap();
    assert!(!lifecycle.is_running().await);
    assert_eq!(
        lifecycle.state().snapshot().await.status,
        WorkerStatus::Offline
    );

    let polls = manager.polls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(manager.polls.load(Ordering::SeqCst), polls);
}

#[tokio::test]
async fn test_reset_restarts_loop() {
    let manager = Arc::new(EmptyQueue::default());
    let lifecycle = lifecycle(Arc::clone(&manager));

    lifecycle.start().await.unwrap();
    lifecycle.reset().await.unwrap();
    assert!(lifecycle.is_running().await);
    assert_eq!(lifecycle.state().snapshot().await.status, WorkerStatus::Idle);

    let polls = manager.polls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(manager.polls.load(Ordering::SeqCst) > polls);

    lifecycle.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_without_start_is_noop() {
    let lifecycle = lifecycle(Arc::new(EmptyQueue::default()));
    lifecycle.stop().await.unwrap();
    assert!(!lifecycle.is_running().await);
    assert_eq!(lifecycle.state().snapshot().await.status, WorkerStatus::Idle);
}
