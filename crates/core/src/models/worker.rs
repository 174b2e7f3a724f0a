use serde::{Deserialize, Serialize};

/// Worker状态，排序为 offline < idle < working
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Offline,
    Idle,
    Working,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Offline => "offline",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Working => "working",
        }
    }
}

/// Worker节点信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// host:port
    pub url: String,
    pub status: WorkerStatus,
    #[serde(default)]
    pub trace_name: Option<String>,
}

impl WorkerInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: WorkerStatus::Idle,
            trace_name: None,
        }
    }

    pub fn offline(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: WorkerStatus::Offline,
            trace_name: None,
        }
    }
}

/// 按 working、idle、offline 排序，同状态按url排序
pub fn sort_workers(workers: &mut [WorkerInfo]) {
    workers.sort_by(|a, b| b.status.cmp(&a.status).then_with(|| a.url.cmp(&b.url)));
}
