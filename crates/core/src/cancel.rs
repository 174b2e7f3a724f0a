use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// 可克隆的取消令牌
///
/// 所有克隆共享同一个状态；一旦取消便不可恢复，需要重新创建。
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// 等待取消
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // sender由self持有，wait_for不会因通道关闭而返回错误
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// 运行future直到完成或被取消，被取消时返回None
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            output = fut => Some(output),
        }
    }

    /// 可被取消的sleep，完整睡眠返回true
    pub async fn sleep(&self, duration: Duration) -> bool {
        self.run_until_cancelled(tokio::time::sleep(duration))
            .await
            .is_some()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
