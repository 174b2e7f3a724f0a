use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracequeue_core::CancellationToken;
use tracing::{debug, info, warn};

use super::{TraceTransaction, TransactionContext, TransactionError};
use crate::components::{ManagerApi, ManagerCallError, WorkerState};

/// 轮询Manager直到拿到一个Trace
pub struct AcquireTransaction {
    manager: Arc<dyn ManagerApi>,
    state: WorkerState,
    poll_interval: Duration,
    retry_delay: Duration,
}

impl AcquireTransaction {
    pub fn new(
        manager: Arc<dyn ManagerApi>,
        state: WorkerState,
        poll_interval: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            manager,
            state,
            poll_interval,
            retry_delay,
        }
    }
}

#[async_trait]
impl TraceTransaction for AcquireTransaction {
    fn name(&self) -> &'static str {
        "acquire"
    }

    async fn execute(
        &self,
        ctx: &mut TransactionContext,
        cancel: &CancellationToken,
    ) -> Result<(), TransactionError> {
        loop {
            if cancel.is_cancelled() {
                return Err(TransactionError::cancelled());
            }

            // 进行中的请求不打断，已经分配的租约总能记录到上下文中
            let delay = match self.manager.acquire(&ctx.worker_url).await {
                Ok(Some(record)) => {
                    info!("开始处理Trace: {}", record.trace_name);
                    self.state.set_working(&record.trace_name).await;
                    ctx.trace = Some(record);
                    return Ok(());
                }
                Ok(None) => {
                    debug!("等待新的Trace...");
                    self.poll_interval
                }
                Err(ManagerCallError::Unreachable(reason)) => {
                    warn!("无法连接Manager: {}", reason);
                    self.retry_delay
                }
                Err(ManagerCallError::Unauthorized) => {
                    return Err(TransactionError::fatal("获取Trace被拒绝: 未授权"));
                }
                Err(err @ ManagerCallError::Rejected { .. }) => {
                    return Err(TransactionError::unclassified(err.to_string()));
                }
            };

            if !cancel.sleep(delay).await {
                return Err(TransactionError::cancelled());
            }
        }
    }
}
