use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::trace_meta::TraceMeta;

/// 带错误列表的处理结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerboseResult {
    pub result: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl VerboseResult {
    pub fn success() -> Self {
        Self {
            result: true,
            errors: Vec::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            result: false,
            errors: vec![error.into()],
        }
    }

    /// 标记失败并记录错误
    pub fn fail(&mut self, error: impl Into<String>) {
        self.result = false;
        self.errors.push(error.into());
    }
}

/// 上报Worker的标识
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRef {
    pub url: String,
}

impl WorkerRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// 一次处理尝试的报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub trace_name: String,
    pub worker: WorkerRef,
    /// 由Manager在收到报告时设置
    #[serde(default)]
    pub processed_date: Option<DateTime<Utc>>,
    pub result: VerboseResult,
    #[serde(default)]
    pub trace_meta: TraceMeta,
}

impl ProcessingReport {
    pub fn new(trace_name: impl Into<String>, worker: WorkerRef, result: VerboseResult) -> Self {
        Self {
            trace_name: trace_name.into(),
            worker,
            processed_date: None,
            result,
            trace_meta: TraceMeta::default(),
        }
    }

    pub fn with_trace_meta(mut self, trace_meta: TraceMeta) -> Self {
        self.trace_meta = trace_meta;
        self
    }
}

/// Manager处理Worker报告的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    /// 报告已生效，租约已删除
    Applied,
    /// 租约不存在或属于其他Worker，报告被忽略
    Stale,
}
