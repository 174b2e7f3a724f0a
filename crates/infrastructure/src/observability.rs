use metrics::{gauge, Gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracequeue_core::{TraceQueueError, TraceQueueResult, WorkerInfo, WorkerStatus};
use tracing::{debug, info};

use crate::broker::QueueOccupancy;

/// 安装全局Prometheus记录器，返回用于渲染 `/metrics` 的句柄
pub fn install_prometheus_recorder() -> TraceQueueResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TraceQueueError::Internal(format!("安装Prometheus记录器失败: {e}")))?;
    info!("Prometheus指标记录器已安装");
    Ok(handle)
}

/// 队列占用和Worker状态指标
pub struct MetricsCollector {
    queued_traces: Gauge,
    leased_traces: Gauge,
    ready_traces: Gauge,
    poisoned_traces: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            queued_traces: gauge!("tracequeue_queued_traces"),
            leased_traces: gauge!("tracequeue_leased_traces"),
            ready_traces: gauge!("tracequeue_ready_traces"),
            poisoned_traces: gauge!("tracequeue_poisoned_traces"),
        }
    }

    pub fn record_occupancy(&self, occupancy: &QueueOccupancy) {
        self.queued_traces.set(occupancy.queued as f64);
        self.leased_traces.set(occupancy.leased as f64);
        self.ready_traces.set(occupancy.ready as f64);
        self.poisoned_traces.set(occupancy.poisoned as f64);

        debug!(
            queued = occupancy.queued,
            leased = occupancy.leased,
            ready = occupancy.ready,
            poisoned = occupancy.poisoned,
            "Queue occupancy updated"
        );
    }

    /// 按状态统计Worker数量，没有Worker的状态记为0
    pub fn record_workers(&self, workers: &[WorkerInfo]) {
        for status in [WorkerStatus::Working, WorkerStatus::Idle, WorkerStatus::Offline] {
            let count = workers.iter().filter(|w| w.status == status).count();
            gauge!("tracequeue_workers", "status" => status.as_str()).set(count as f64);
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
