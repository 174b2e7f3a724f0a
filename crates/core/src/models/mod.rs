//! # 数据模型
//!
//! Trace在四个集合之间流转：排队(queued)、处理中(in-processing)、
//! 已完成(ready)、中毒(poisoned)。
//!
//! ## 核心模型
//!
//! ### TraceRecord - 排队中的Trace
//! 以 `trace_name` 为唯一标识，入队时快照Worker需要使用的外部端点。
//!
//! ### LeaseRecord - 租约
//! `TraceRecord` + 持有它的 `worker_url`，每个Worker最多持有一个租约。
//!
//! ### ProcessedTraceRecord - 处理结果
//! `TraceRecord` + 按时间顺序追加的 `ProcessingReport` 列表，只追加不删除。
//!
//! ### WorkerInfo - Worker状态
//! Manager通过轮询Worker健康接口获得，只是缓存，不是事实来源。

pub mod report;
pub mod trace;
pub mod trace_meta;
pub mod worker;

pub use report::{ProcessingReport, ReportOutcome, VerboseResult, WorkerRef};
pub use trace::{
    LeaseRecord, ProcessedTraceRecord, TraceRecord, TraceStatus, WorkerConfiguration,
};
pub use trace_meta::{Bookmark, MetaOptions, TraceMeta};
pub use worker::{sort_workers, WorkerInfo, WorkerStatus};
