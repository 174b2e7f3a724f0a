use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracequeue_core::{CancellationToken, UTRACE_EXT};
use tracing::info;

use super::{TraceTransaction, TransactionContext, TransactionError};
use crate::components::MetricsBuffer;
use crate::processor::TraceProcessor;

/// 运行处理程序，指标写入缓冲区
pub struct ProcessTransaction {
    processor: Arc<dyn TraceProcessor>,
    buffer: MetricsBuffer,
    trace_sessions_dir: PathBuf,
}

impl ProcessTransaction {
    pub fn new(
        processor: Arc<dyn TraceProcessor>,
        buffer: MetricsBuffer,
        trace_sessions_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            processor,
            buffer,
            trace_sessions_dir: trace_sessions_dir.into(),
        }
    }
}

#[async_trait]
impl TraceTransaction for ProcessTransaction {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn execute(
        &self,
        ctx: &mut TransactionContext,
        cancel: &CancellationToken,
    ) -> Result<(), TransactionError> {
        if cancel.is_cancelled() {
            return Err(TransactionError::cancelled());
        }
        let trace_name = ctx
            .trace_name()
            .ok_or_else(|| TransactionError::fatal("没有持有任何Trace"))?
            .to_string();

        ctx.trace_meta.started_timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;

        let path = self
            .trace_sessions_dir
            .join(format!("{trace_name}{UTRACE_EXT}"));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(TransactionError::fatal(format!(
                "Export failed, trace not found: '{trace_name}'! Full path: '{}'",
                path.display()
            )));
        }

        self.buffer.flush().await;
        info!("接收处理程序推送的指标: {}", trace_name);
        self.processor.process(&trace_name, cancel).await?;
        Ok(())
    }
}
