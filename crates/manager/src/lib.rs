//! # Manager服务
//!
//! 持有Trace队列和Worker登记表：
//! - [`TraceQueueService`] 入队、租约、上报处理和状态查询
//! - [`WorkerRegistry`] 按需轮询Worker状态
//! - [`enqueue_unprocessed`] 启动时扫描Trace目录

pub mod trace_scanner;
pub mod trace_service;
pub mod worker_registry;

pub use trace_scanner::enqueue_unprocessed;
pub use trace_service::{normalize_trace_name, TraceQueueService};
pub use worker_registry::WorkerRegistry;
