pub mod cancel;
pub mod errors;
pub mod models;
pub mod retry;

pub use cancel::CancellationToken;
pub use errors::*;
pub use models::{
    sort_workers, Bookmark, LeaseRecord, MetaOptions, ProcessedTraceRecord, ProcessingReport,
    ReportOutcome, TraceMeta, TraceRecord, TraceStatus, VerboseResult, WorkerConfiguration,
    WorkerInfo, WorkerRef, WorkerStatus,
};
pub use retry::{retry_with, RetryError, RetryPolicy};

/// Trace文件扩展名
pub const UTRACE_EXT: &str = ".utrace";

/// Manager默认端口
pub const DEFAULT_PORT: u16 = 30000;
