use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracequeue_core::{retry_with, CancellationToken, RetryError, RetryPolicy};
use tracing::info;

use super::{TraceTransaction, TransactionContext, TransactionError};
use crate::components::{ManagerApi, ManagerCallError};

/// 向Manager上报处理成功，直到被接受或取消
pub struct ReportTransaction {
    manager: Arc<dyn ManagerApi>,
    retry_delay: Duration,
}

impl ReportTransaction {
    pub fn new(manager: Arc<dyn ManagerApi>, retry_delay: Duration) -> Self {
        Self {
            manager,
            retry_delay,
        }
    }
}

#[async_trait]
impl TraceTransaction for ReportTransaction {
    fn name(&self) -> &'static str {
        "report"
    }

    async fn execute(
        &self,
        ctx: &mut TransactionContext,
        cancel: &CancellationToken,
    ) -> Result<(), TransactionError> {
        let report = ctx
            .report()
            .ok_or_else(|| TransactionError::fatal("没有持有任何Trace"))?;

        let delivered = retry_with(
            "report_ready",
            &RetryPolicy::fixed(self.retry_delay),
            cancel,
            |e: &ManagerCallError| !matches!(e, ManagerCallError::Unauthorized),
            || self.manager.report_ready(&report),
        )
        .await;

        match delivered {
            Ok(()) => {
                info!("已上报处理结果: {}", report.trace_name);
                Ok(())
            }
            Err(RetryError::Cancelled) => Err(TransactionError::cancelled()),
            Err(RetryError::Permanent(e)) | Err(RetryError::Exhausted { last: e, .. }) => {
                Err(TransactionError::external(e.to_string()))
            }
        }
    }
}
