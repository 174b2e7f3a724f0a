use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::report::ProcessingReport;

pub const DEFAULT_ELASTIC_URL: &str = "http://127.0.0.1:9200";
pub const DEFAULT_DASHBOARD_URL: &str = "http://127.0.0.1:5050";

/// 入队时捕获的外部端点快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfiguration {
    /// 指标索引服务地址
    pub elastic: Vec<String>,
    /// 看板服务地址
    pub dashboard: String,
}

impl Default for WorkerConfiguration {
    fn default() -> Self {
        Self {
            elastic: vec![DEFAULT_ELASTIC_URL.to_string()],
            dashboard: DEFAULT_DASHBOARD_URL.to_string(),
        }
    }
}

/// 排队中的Trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_name: String,
    pub creation_date: DateTime<Utc>,
    #[serde(default)]
    pub worker_configuration: Option<WorkerConfiguration>,
    /// 人工重新入队前积累的处理报告
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ProcessingReport>,
}

impl TraceRecord {
    pub fn new(trace_name: impl Into<String>, worker_configuration: Option<WorkerConfiguration>) -> Self {
        Self {
            trace_name: trace_name.into(),
            creation_date: Utc::now(),
            worker_configuration,
            history: Vec::new(),
        }
    }

    pub fn with_creation_date(mut self, creation_date: DateTime<Utc>) -> Self {
        self.creation_date = creation_date;
        self
    }

    pub fn into_lease(self, worker_url: impl Into<String>) -> LeaseRecord {
        LeaseRecord {
            trace: self,
            worker_url: worker_url.into(),
        }
    }
}

/// 处理中的Trace（租约）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    #[serde(flatten)]
    pub trace: TraceRecord,
    pub worker_url: String,
}

impl LeaseRecord {
    pub fn trace_name(&self) -> &str {
        &self.trace.trace_name
    }

    /// 退回队列，保留原始的 creation_date
    pub fn into_queued(self) -> TraceRecord {
        self.trace
    }
}

/// 已处理（成功或中毒）的Trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTraceRecord {
    #[serde(flatten)]
    pub trace: TraceRecord,
    #[serde(default)]
    pub processing_reports: Vec<ProcessingReport>,
}

impl ProcessedTraceRecord {
    /// 以租约中的Trace创建，历史报告作为起始报告
    pub fn from_trace(mut trace: TraceRecord) -> Self {
        let processing_reports = std::mem::take(&mut trace.history);
        Self {
            trace,
            processing_reports,
        }
    }

    pub fn trace_name(&self) -> &str {
        &self.trace.trace_name
    }

    pub fn append_report(&mut self, report: ProcessingReport) {
        self.processing_reports.push(report);
    }

    pub fn last_report(&self) -> Option<&ProcessingReport> {
        self.processing_reports.last()
    }

    pub fn last_processed_date(&self) -> Option<DateTime<Utc>> {
        self.last_report().and_then(|report| report.processed_date)
    }

    /// 人工重新入队：报告转入history，使用新的入队时间
    pub fn into_requeued(self, creation_date: DateTime<Utc>) -> TraceRecord {
        TraceRecord {
            trace_name: self.trace.trace_name,
            creation_date,
            worker_configuration: self.trace.worker_configuration,
            history: self.processing_reports,
        }
    }
}

/// Trace状态，按 queued → in_progress → processed → poisoned 的顺序判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Queued,
    InProgress,
    Processed,
    Poisoned,
    NotFound,
}

impl std::fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TraceStatus::Queued => "queued",
            TraceStatus::InProgress => "in_progress",
            TraceStatus::Processed => "processed",
            TraceStatus::Poisoned => "poisoned",
            TraceStatus::NotFound => "not_found",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::report::{VerboseResult, WorkerRef};

    fn report(trace_name: &str) -> ProcessingReport {
        ProcessingReport::new(
            trace_name,
            WorkerRef::new("127.0.0.1:30001"),
            VerboseResult::failure("boom"),
        )
    }

    #[test]
    fn test_lease_serializes_flat() {
        let lease = TraceRecord::new("20240101_120000_host", None).into_lease("w1:30001");
        let value = serde_json::to_value(&lease).unwrap();

        assert_eq!(value["trace_name"], "20240101_120000_host");
        assert_eq!(value["worker_url"], "w1:30001");
        assert!(value.get("history").is_none());

        let back: LeaseRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, lease);
    }

    #[test]
    fn test_requeue_carries_reports_forward() {
        let trace = TraceRecord::new("t", Some(WorkerConfiguration::default()));
        let mut processed = ProcessedTraceRecord::from_trace(trace);
        processed.append_report(report("t"));

        let requeued = processed.into_requeued(Utc::now());
        assert_eq!(requeued.history.len(), 1);

        let again = ProcessedTraceRecord::from_trace(requeued);
        assert_eq!(again.processing_reports.len(), 1);
        assert!(again.trace.history.is_empty());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TraceStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(TraceStatus::NotFound.to_string(), "not_found");
    }
}
