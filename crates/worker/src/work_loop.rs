use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracequeue_config::{ExportConfig, WorkerConfig};
use tracequeue_core::{retry_with, CancellationToken, ProcessingReport, RetryError, RetryPolicy};
use tracing::{error, info, warn};

use crate::components::{ManagerApi, ManagerCallError, MetricsBuffer, WorkerState};
use crate::processor::TraceProcessor;
use crate::sink::MetricsSink;
use crate::transactions::{
    AcquireTransaction, CompositionFailure, ExportTransaction, FailureClass, ProcessTransaction,
    ReportTransaction, TraceTransaction, TransactionComposition, TransactionContext,
};

/// 处理循环的时间参数和导出配置
#[derive(Debug, Clone)]
pub struct WorkLoopSettings {
    pub poll_interval: Duration,
    pub retry_delay: Duration,
    pub shutdown_grace: Duration,
    pub trace_sessions_dir: PathBuf,
    pub export: ExportConfig,
}

impl WorkLoopSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds),
            trace_sessions_dir: PathBuf::from(&config.trace_sessions_dir),
            export: config.export.clone(),
        }
    }
}

/// 一次处理的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 已上报处理成功
    Completed,
    /// Trace被标记为无法处理
    Poisoned,
    /// Trace已退回队列
    Released,
    /// 没有持有Trace时失败，等待后重试
    BackedOff,
    /// 收到取消，循环结束
    Stopped,
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Poison,
    Release,
}

impl Settlement {
    fn operation(self) -> &'static str {
        match self {
            Settlement::Poison => "mark_poisoned",
            Settlement::Release => "release_from_worker",
        }
    }
}

/// Worker的处理循环：acquire → process → export → report
pub struct WorkLoop {
    manager: Arc<dyn ManagerApi>,
    state: WorkerState,
    composition: TransactionComposition,
    retry_delay: Duration,
    shutdown_grace: Duration,
}

impl WorkLoop {
    pub fn new(
        manager: Arc<dyn ManagerApi>,
        processor: Arc<dyn TraceProcessor>,
        sink: Arc<dyn MetricsSink>,
        buffer: MetricsBuffer,
        state: WorkerState,
        settings: WorkLoopSettings,
    ) -> Self {
        let steps: Vec<Box<dyn TraceTransaction>> = vec![
            Box::new(AcquireTransaction::new(
                Arc::clone(&manager),
                state.clone(),
                settings.poll_interval,
                settings.retry_delay,
            )),
            Box::new(ProcessTransaction::new(
                processor,
                buffer.clone(),
                settings.trace_sessions_dir.clone(),
            )),
            Box::new(ExportTransaction::new(sink, buffer, settings.export.clone())),
            Box::new(ReportTransaction::new(
                Arc::clone(&manager),
                settings.retry_delay,
            )),
        ];

        Self {
            manager,
            state,
            composition: TransactionComposition::new(steps),
            retry_delay: settings.retry_delay,
            shutdown_grace: settings.shutdown_grace,
        }
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// 循环处理直到被取消
    pub async fn run(&self, cancel: &CancellationToken) {
        info!("处理循环启动: {:?}", self.composition.step_names());
        loop {
            let outcome = self.run_once(cancel).await;
            info!("本轮处理结束: {:?}", outcome);
            if outcome == RunOutcome::Stopped {
                break;
            }
        }
        info!("处理循环已停止");
    }

    /// 执行一轮处理并按失败类型结算持有的Trace
    pub async fn run_once(&self, cancel: &CancellationToken) -> RunOutcome {
        let mut ctx = TransactionContext::new(self.state.url().await);
        let outcome = match self.composition.execute(&mut ctx, cancel).await {
            Ok(()) => RunOutcome::Completed,
            Err(failure) => self.settle_failure(&mut ctx, failure, cancel).await,
        };

        if outcome == RunOutcome::Stopped {
            self.state.set_offline().await;
        } else {
            self.state.set_idle().await;
        }
        outcome
    }

    async fn settle_failure(
        &self,
        ctx: &mut TransactionContext,
        failure: CompositionFailure,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let class = failure.error.class;
        ctx.result.fail(failure.error.message.clone());

        let Some(report) = ctx.report() else {
            if class == FailureClass::Cancelled {
                return RunOutcome::Stopped;
            }
            warn!("{} 失败且未持有Trace，{:?} 后重试", failure.step, self.retry_delay);
            return if cancel.sleep(self.retry_delay).await {
                RunOutcome::BackedOff
            } else {
                RunOutcome::Stopped
            };
        };

        let (settlement, outcome) = match class {
            FailureClass::Cancelled => {
                self.release_on_shutdown(&report).await;
                return RunOutcome::Stopped;
            }
            FailureClass::Fatal => (Settlement::Poison, RunOutcome::Poisoned),
            FailureClass::ExternalService | FailureClass::Unclassified => {
                (Settlement::Release, RunOutcome::Released)
            }
        };

        match self.deliver(settlement, &report, cancel).await {
            Ok(()) => outcome,
            Err(RetryError::Cancelled) => {
                self.release_on_shutdown(&report).await;
                RunOutcome::Stopped
            }
            Err(e) => {
                error!("{} 失败: {}: {}", settlement.operation(), report.trace_name, e);
                outcome
            }
        }
    }

    /// 取消后退回Trace，调用时间受宽限期限制
    async fn release_on_shutdown(&self, report: &ProcessingReport) {
        let release = CancellationToken::new();
        let delivered = tokio::time::timeout(
            self.shutdown_grace,
            self.deliver(Settlement::Release, report, &release),
        )
        .await;
        match delivered {
            Ok(Ok(())) => info!("已退回Trace: {}", report.trace_name),
            Ok(Err(e)) => error!("退回Trace失败: {}: {}", report.trace_name, e),
            Err(_) => warn!("宽限期内未能退回Trace: {}", report.trace_name),
        }
    }

    async fn deliver(
        &self,
        settlement: Settlement,
        report: &ProcessingReport,
        cancel: &CancellationToken,
    ) -> Result<(), RetryError<ManagerCallError>> {
        retry_with(
            settlement.operation(),
            &RetryPolicy::fixed(self.retry_delay),
            cancel,
            |e: &ManagerCallError| !matches!(e, ManagerCallError::Unauthorized),
            || async move {
                match settlement {
                    Settlement::Poison => self.manager.mark_poisoned(report).await,
                    Settlement::Release => self.manager.release(report).await,
                }
            },
        )
        .await
    }
}
