use std::collections::BTreeSet;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracequeue_core::{sort_workers, WorkerInfo};
use tracing::{debug, info};

/// Worker地址登记表
///
/// 只记录曾经获取过任务的Worker地址，状态在查询时实时轮询，
/// 不作为租约的事实来源。
pub struct WorkerRegistry {
    addresses: RwLock<BTreeSet<String>>,
    client: reqwest::Client,
    status_timeout: Duration,
}

impl WorkerRegistry {
    pub fn new(status_timeout: Duration) -> Self {
        Self {
            addresses: RwLock::new(BTreeSet::new()),
            client: reqwest::Client::new(),
            status_timeout,
        }
    }

    /// 登记Worker地址，首次出现时返回true
    pub async fn register(&self, worker_url: &str) -> bool {
        let inserted = self.addresses.write().await.insert(worker_url.to_string());
        if inserted {
            info!("登记新Worker: {}", worker_url);
        }
        inserted
    }

    pub async fn addresses(&self) -> Vec<String> {
        self.addresses.read().await.iter().cloned().collect()
    }

    fn status_url(worker_url: &str) -> String {
        if worker_url.contains("://") {
            format!("{}/worker/status", worker_url.trim_end_matches('/'))
        } else {
            format!("http://{worker_url}/worker/status")
        }
    }

    /// 查询单个Worker状态，请求失败或超时视为离线
    pub async fn fetch_status(&self, worker_url: &str) -> WorkerInfo {
        let response = self
            .client
            .get(Self::status_url(worker_url))
            .timeout(self.status_timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        let info = match response {
            Ok(response) => response.json::<WorkerInfo>().await,
            Err(e) => Err(e),
        };

        match info {
            Ok(mut info) => {
                info.url = worker_url.to_string();
                info
            }
            Err(e) => {
                debug!("Worker {} 无响应: {}", worker_url, e);
                WorkerInfo::offline(worker_url)
            }
        }
    }

    /// 并发轮询所有已登记的Worker，按 working → idle → offline → url 排序
    pub async fn list_workers(&self) -> Vec<WorkerInfo> {
        let addresses = self.addresses().await;
        let mut workers = join_all(addresses.iter().map(|url| self.fetch_status(url))).await;
        sort_workers(&mut workers);
        workers
    }
}
