use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracequeue_core::{ProcessingReport, TraceRecord};
use tracing::{debug, info};

/// 调用Manager失败的原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerCallError {
    #[error("Manager不可达: {0}")]
    Unreachable(String),

    #[error("Manager拒绝访问")]
    Unauthorized,

    #[error("Manager返回 HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl ManagerCallError {
    /// 网络层故障，等待后重试同一个调用
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ManagerCallError::Unreachable(_))
    }
}

/// Worker使用的Manager接口
#[async_trait]
pub trait ManagerApi: Send + Sync {
    /// 获取租约，队列为空时返回None
    async fn acquire(&self, worker_url: &str) -> Result<Option<TraceRecord>, ManagerCallError>;

    async fn report_ready(&self, report: &ProcessingReport) -> Result<(), ManagerCallError>;

    async fn mark_poisoned(&self, report: &ProcessingReport) -> Result<(), ManagerCallError>;

    async fn release(&self, report: &ProcessingReport) -> Result<(), ManagerCallError>;
}

/// 通过HTTP访问Manager
pub struct HttpManagerClient {
    manager_url: String,
    http_client: reqwest::Client,
}

impl HttpManagerClient {
    pub fn new(manager_url: impl Into<String>, request_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            manager_url: manager_url.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    pub fn manager_url(&self) -> &str {
        &self.manager_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.manager_url, path)
    }

    async fn put_report(
        &self,
        path: &str,
        report: &ProcessingReport,
    ) -> Result<(), ManagerCallError> {
        let response = self
            .http_client
            .put(self.url(path))
            .json(report)
            .send()
            .await
            .map_err(|e| ManagerCallError::Unreachable(e.to_string()))?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ManagerCallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ManagerCallError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ManagerCallError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ManagerApi for HttpManagerClient {
    async fn acquire(&self, worker_url: &str) -> Result<Option<TraceRecord>, ManagerCallError> {
        let response = self
            .http_client
            .get(self.url("/trace/queued/acquire"))
            .json(&json!({ "url": worker_url }))
            .send()
            .await
            .map_err(|e| ManagerCallError::Unreachable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("队列为空，等待新的Trace");
            return Ok(None);
        }

        let response = check_status(response).await?;
        let record = response
            .json::<TraceRecord>()
            .await
            .map_err(|e| ManagerCallError::Rejected {
                status: StatusCode::OK.as_u16(),
                body: format!("无法解析租约: {e}"),
            })?;
        info!("获取到Trace: {}", record.trace_name);
        Ok(Some(record))
    }

    async fn report_ready(&self, report: &ProcessingReport) -> Result<(), ManagerCallError> {
        self.put_report("/trace/ready/put", report).await
    }

    async fn mark_poisoned(&self, report: &ProcessingReport) -> Result<(), ManagerCallError> {
        self.put_report("/trace/queued/mark_poisoned", report).await
    }

    async fn release(&self, report: &ProcessingReport) -> Result<(), ManagerCallError> {
        self.put_report("/trace/queued/release_from_worker", report)
            .await
    }
}
