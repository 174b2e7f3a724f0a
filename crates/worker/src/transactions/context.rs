use tracequeue_core::{ProcessingReport, TraceMeta, TraceRecord, VerboseResult, WorkerRef};

/// 一次处理过程中各步骤共享的状态
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub worker_url: String,
    /// 获取到租约之后才有值
    pub trace: Option<TraceRecord>,
    pub trace_meta: TraceMeta,
    pub result: VerboseResult,
}

impl TransactionContext {
    pub fn new(worker_url: impl Into<String>) -> Self {
        Self {
            worker_url: worker_url.into(),
            trace: None,
            trace_meta: TraceMeta::default(),
            result: VerboseResult::success(),
        }
    }

    pub fn trace_name(&self) -> Option<&str> {
        self.trace.as_ref().map(|trace| trace.trace_name.as_str())
    }

    /// 持有Trace时生成上报给Manager的报告
    pub fn report(&self) -> Option<ProcessingReport> {
        let trace_name = self.trace_name()?;
        Some(
            ProcessingReport::new(
                trace_name,
                WorkerRef::new(&self.worker_url),
                self.result.clone(),
            )
            .with_trace_meta(self.trace_meta.clone()),
        )
    }
}
