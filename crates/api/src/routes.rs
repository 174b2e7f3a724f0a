use axum::{
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracequeue_infrastructure::MetricsCollector;
use tracequeue_manager::{TraceQueueService, WorkerRegistry};
use tracequeue_worker::{MetricsBuffer, WorkerLifecycle};

use crate::handlers::{
    health::{metrics, ping},
    performance_metrics::{add_frames, set_bookmarks, set_header, set_metadata_names, set_perf_config},
    traces::{
        acquire_trace, drop_queued, enqueue_trace, get_status, list_in_progress, list_poisoned,
        list_queued, list_ready, mark_poisoned, release_from_worker, report_ready,
    },
    worker_node::{reset_worker, worker_ping, worker_status},
    workers::list_workers,
};

/// Manager进程的应用状态
#[derive(Clone)]
pub struct ManagerState {
    pub traces: Arc<TraceQueueService>,
    pub workers: Arc<WorkerRegistry>,
    pub collector: Arc<MetricsCollector>,
    /// 未安装Prometheus记录器时 /metrics 返回空文本
    pub prometheus: Option<PrometheusHandle>,
}

/// Worker进程的应用状态
#[derive(Clone)]
pub struct WorkerNodeState {
    pub lifecycle: Arc<WorkerLifecycle>,
    pub buffer: MetricsBuffer,
}

/// Manager路由
pub fn create_manager_routes(state: ManagerState) -> Router {
    Router::new()
        // 队列和租约
        .route("/trace/queued/put", put(enqueue_trace))
        .route("/trace/queued/acquire", get(acquire_trace))
        .route("/trace/queued/mark_poisoned", put(mark_poisoned))
        .route("/trace/queued/release_from_worker", put(release_from_worker))
        .route("/trace/queued/drop", put(drop_queued))
        .route("/trace/ready/put", put(report_ready))
        .route("/trace/get_status", get(get_status))
        // 列表
        .route("/trace/queued/list", get(list_queued))
        .route("/trace/in_progress/list", get(list_in_progress))
        .route("/trace/ready/list", get(list_ready))
        .route("/trace/poisoned/list", get(list_poisoned))
        // Worker和监控
        .route("/worker/list", get(list_workers))
        .route("/ping", get(ping))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Worker路由
pub fn create_worker_routes(state: WorkerNodeState) -> Router {
    Router::new()
        .route("/worker/status", get(worker_status))
        .route("/worker/reset", get(reset_worker))
        .route("/ping", get(worker_ping))
        .route("/performance_metrics/set/perf_config", post(set_perf_config))
        .route("/performance_metrics/set/metadata_names", post(set_metadata_names))
        .route("/performance_metrics/set/bookmarks", post(set_bookmarks))
        .route("/performance_metrics/set/header", post(set_header))
        .route("/performance_metrics/add", post(add_frames))
        .with_state(state)
}
