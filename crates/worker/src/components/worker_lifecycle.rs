use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracequeue_core::{CancellationToken, TraceQueueError, TraceQueueResult, WorkerInfo, WorkerStatus};
use tracing::{info, warn};

use crate::work_loop::WorkLoop;

/// 当前Worker的状态，供 /worker/status 读取
#[derive(Clone)]
pub struct WorkerState {
    inner: Arc<RwLock<WorkerInfo>>,
}

impl WorkerState {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(WorkerInfo::new(url))),
        }
    }

    pub async fn url(&self) -> String {
        self.inner.read().await.url.clone()
    }

    pub async fn set_working(&self, trace_name: &str) {
        let mut info = self.inner.write().await;
        info.status = WorkerStatus::Working;
        info.trace_name = Some(trace_name.to_string());
    }

    pub async fn set_idle(&self) {
        let mut info = self.inner.write().await;
        info.status = WorkerStatus::Idle;
        info.trace_name = None;
    }

    pub async fn set_offline(&self) {
        let mut info = self.inner.write().await;
        info.status = WorkerStatus::Offline;
        info.trace_name = None;
    }

    pub async fn snapshot(&self) -> WorkerInfo {
        self.inner.read().await.clone()
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 管理处理循环的启动、停止和重置
pub struct WorkerLifecycle {
    work_loop: Arc<WorkLoop>,
    state: WorkerState,
    shutdown_grace: Duration,
    running: Mutex<Option<RunningLoop>>,
}

impl WorkerLifecycle {
    pub fn new(work_loop: Arc<WorkLoop>, state: WorkerState, shutdown_grace: Duration) -> Self {
        Self {
            work_loop,
            state,
            shutdown_grace,
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    pub async fn start(&self) -> TraceQueueResult<()> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(TraceQueueError::Internal(
                "Worker处理循环已在运行".to_string(),
            ));
        }

        info!("启动Worker处理循环: {}", self.state.url().await);
        self.state.set_idle().await;
        let cancel = CancellationToken::new();
        let work_loop = Arc::clone(&self.work_loop);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            work_loop.run(&loop_cancel).await;
        });

        *running = Some(RunningLoop { cancel, handle });
        Ok(())
    }

    /// 取消处理循环，超过宽限期仍未退出则强制终止
    pub async fn stop(&self) -> TraceQueueResult<()> {
        let Some(RunningLoop { cancel, mut handle }) = self.running.lock().await.take() else {
            return Ok(());
        };

        info!("停止Worker处理循环");
        cancel.cancel();
        // 释放调用本身也受宽限期限制，这里额外留出一个宽限期
        match tokio::time::timeout(self.shutdown_grace * 2, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("处理循环异常退出: {}", e),
            Err(_) => {
                warn!("处理循环未在宽限期内退出，强制终止");
                handle.abort();
            }
        }
        self.state.set_offline().await;
        Ok(())
    }

    pub async fn reset(&self) -> TraceQueueResult<()> {
        info!("重置Worker处理循环");
        self.stop().await?;
        self.start().await
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}
