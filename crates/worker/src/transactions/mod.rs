//! # Trace处理流水线
//!
//! 四个步骤按固定顺序执行：获取租约 → 运行处理程序 → 导出指标 → 上报结果。
//! 每个步骤失败时返回带 [`FailureClass`] 的 [`TransactionError`]，
//! 由 [`TransactionComposition`] 逆序回滚已执行的步骤，工作循环再根据分类决定Trace的去向。

use async_trait::async_trait;
use tracequeue_core::CancellationToken;

pub mod acquire;
pub mod composition;
pub mod context;
pub mod error;
pub mod export;
pub mod process;
pub mod report;

pub use acquire::AcquireTransaction;
pub use composition::{CompositionFailure, TransactionComposition};
pub use context::TransactionContext;
pub use error::{FailureClass, TransactionError};
pub use export::ExportTransaction;
pub use process::ProcessTransaction;
pub use report::ReportTransaction;

/// 流水线中的一个步骤
#[async_trait]
pub trait TraceTransaction: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        ctx: &mut TransactionContext,
        cancel: &CancellationToken,
    ) -> Result<(), TransactionError>;

    /// 全部步骤成功后按顺序调用
    async fn commit(&self, _ctx: &mut TransactionContext) -> Result<(), TransactionError> {
        Ok(())
    }

    /// 撤销本步骤的副作用，失败只记录日志
    async fn rollback(&self, _ctx: &mut TransactionContext) -> Result<(), TransactionError> {
        Ok(())
    }
}
