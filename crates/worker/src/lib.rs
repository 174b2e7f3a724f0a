//! # Worker
//!
//! 从Manager获取Trace，运行处理程序，把收到的指标写入索引服务，再上报结果。
//!
//! - [`work_loop::WorkLoop`] 把四个步骤组合成一轮处理，并按失败类型决定Trace的去向
//! - [`components::WorkerLifecycle`] 负责启动、停止和重置处理循环
//! - [`components::MetricsBuffer`] 接收处理程序推送的指标

pub mod components;
pub mod export;
pub mod processor;
pub mod sink;
pub mod transactions;
pub mod work_loop;

pub use components::{
    HttpManagerClient, ManagerApi, ManagerCallError, MetricsBuffer, MetricsHeader, WorkerLifecycle,
    WorkerState,
};
pub use processor::{CommandTraceProcessor, ProcessorError, TraceProcessor};
pub use sink::{ElasticsearchSink, ExportBatch, MetricsSink, SinkError};
pub use work_loop::{RunOutcome, WorkLoop, WorkLoopSettings};
