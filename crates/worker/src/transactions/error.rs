use std::fmt;

use crate::export::ExportError;
use crate::processor::ProcessorError;
use crate::sink::SinkError;

/// 失败分类，决定Trace的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// 输入或环境有问题，重试无效，Trace进入中毒集合
    Fatal,
    /// 下游服务不可用，Trace退回队列
    ExternalService,
    /// 收到停止请求，退回Trace后退出循环
    Cancelled,
    /// 未知失败，按可重试处理
    Unclassified,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureClass::Fatal => "fatal",
            FailureClass::ExternalService => "external_service",
            FailureClass::Cancelled => "cancelled",
            FailureClass::Unclassified => "unclassified",
        };
        write!(f, "{s}")
    }
}

/// 步骤失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{class}] {message}")]
pub struct TransactionError {
    pub class: FailureClass,
    pub message: String,
}

impl TransactionError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Fatal, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(FailureClass::ExternalService, message)
    }

    pub fn cancelled() -> Self {
        Self::new(FailureClass::Cancelled, "操作已取消")
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Unclassified, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.class == FailureClass::Cancelled
    }
}

impl From<ProcessorError> for TransactionError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Cancelled => TransactionError::cancelled(),
            other => TransactionError::fatal(other.to_string()),
        }
    }
}

impl From<SinkError> for TransactionError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Unreachable(_) => TransactionError::external(err.to_string()),
            SinkError::NoHosts | SinkError::Rejected(_) => TransactionError::fatal(err.to_string()),
        }
    }
}

impl From<ExportError> for TransactionError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Sink(sink) => sink.into(),
            ExportError::NoMetrics(_) | ExportError::Document(_) => {
                TransactionError::fatal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_failures_keep_their_class() {
        let no_metrics: TransactionError = ExportError::NoMetrics("empty".to_string()).into();
        assert_eq!(no_metrics.class, FailureClass::Fatal);

        let unreachable: TransactionError =
            ExportError::Sink(SinkError::Unreachable("refused".to_string())).into();
        assert_eq!(unreachable.class, FailureClass::ExternalService);

        let rejected: TransactionError = SinkError::Rejected("mapper_parsing_exception".to_string()).into();
        assert_eq!(rejected.class, FailureClass::Fatal);
    }

    #[test]
    fn test_processor_failures() {
        let cancelled: TransactionError = ProcessorError::Cancelled.into();
        assert!(cancelled.is_cancelled());

        let exit: TransactionError = ProcessorError::Exit(Some(3)).into();
        assert_eq!(exit.class, FailureClass::Fatal);
        assert!(exit.message.contains('3'));
    }
}
