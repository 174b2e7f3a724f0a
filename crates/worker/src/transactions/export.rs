use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracequeue_config::ExportConfig;
use tracequeue_core::models::trace_meta::normalization_window;
use tracequeue_core::{CancellationToken, MetaOptions};
use tracing::info;

use super::{TraceTransaction, TransactionContext, TransactionError};
use crate::components::MetricsBuffer;
use crate::export::{build_documents, ExportError};
use crate::sink::{ExportBatch, MetricsSink};

/// 整理缓冲区中的指标并写入索引服务
pub struct ExportTransaction {
    sink: Arc<dyn MetricsSink>,
    buffer: MetricsBuffer,
    config: ExportConfig,
}

impl ExportTransaction {
    pub fn new(sink: Arc<dyn MetricsSink>, buffer: MetricsBuffer, config: ExportConfig) -> Self {
        Self {
            sink,
            buffer,
            config,
        }
    }

    fn meta_options(&self) -> MetaOptions {
        MetaOptions {
            index_prefix: Some(self.config.index_prefix.clone()),
            build: self.config.build.clone(),
            title: self.config.title.clone(),
            workstation: self.config.workstation.clone(),
        }
    }
}

#[async_trait]
impl TraceTransaction for ExportTransaction {
    fn name(&self) -> &'static str {
        "export"
    }

    async fn execute(
        &self,
        ctx: &mut TransactionContext,
        cancel: &CancellationToken,
    ) -> Result<(), TransactionError> {
        if cancel.is_cancelled() {
            return Err(TransactionError::cancelled());
        }
        let trace = ctx
            .trace
            .clone()
            .ok_or_else(|| TransactionError::fatal("没有持有任何Trace"))?;

        let snapshot = self.buffer.snapshot().await;
        if !snapshot.is_available() {
            return Err(ExportError::NoMetrics(format!(
                "No data has been received from the trace processor. {}",
                snapshot.summary()
            ))
            .into());
        }

        ctx.trace_meta.update(
            &snapshot.bookmarks,
            &trace.trace_name,
            &snapshot.metadata_names,
            &self.meta_options(),
        );
        let window = normalization_window(&self.config.normalize, &snapshot.bookmarks);
        let documents = build_documents(&snapshot, window, &ctx.trace_meta)?;

        let meta = &ctx.trace_meta;
        let batch = ExportBatch {
            index: meta
                .es_index
                .clone()
                .unwrap_or_else(|| meta.index_name(Some(&self.config.index_prefix))),
            metric_names: snapshot.metric_names.clone(),
            metadata_names: snapshot.metadata_names.clone(),
            test_id: meta.test_id.clone().unwrap_or_default(),
            workstation: meta.workstation.clone().unwrap_or_default(),
            test_start: meta.test_start.clone().unwrap_or_default(),
            documents,
        };
        // 使用入队时的端点快照
        let hosts = trace
            .worker_configuration
            .as_ref()
            .map(|configuration| configuration.elastic.clone())
            .unwrap_or_default();

        let written = cancel
            .run_until_cancelled(self.sink.export(&hosts, &batch))
            .await
            .ok_or_else(TransactionError::cancelled)?
            .map_err(ExportError::from)?;

        ctx.trace_meta.processed_timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;
        info!("已导出 {} 个文档到 {}", written, batch.index);
        Ok(())
    }
}
