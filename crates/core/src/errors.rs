use thiserror::Error;

/// 系统错误类型定义
#[derive(Debug, Error)]
pub enum TraceQueueError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Trace未找到: {name}")]
    TraceNotFound { name: String },

    #[error("Worker {worker_url} 没有持有任何Trace")]
    LeaseNotFound { worker_url: String },

    #[error("无效请求: {0}")]
    InvalidRequest(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("操作已取消")]
    Cancelled,

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TraceQueueError {
    fn from(err: serde_json::Error) -> Self {
        TraceQueueError::Serialization(err.to_string())
    }
}

impl TraceQueueError {
    /// 存储层的瞬时错误（锁竞争、连接中断等），整个调用可以安全重试
    pub fn is_transient(&self) -> bool {
        match self {
            TraceQueueError::Database(err) => is_transient_sqlx_error(err),
            _ => false,
        }
    }
}

/// SQLite: BUSY(5) / LOCKED(6)，扩展码取低8位
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// PostgreSQL: serialization_failure / deadlock_detected / lock_not_available
const PG_TRANSIENT_CODES: [&str; 3] = ["40001", "40P01", "55P03"];

pub fn is_transient_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => {
            // 并发插入同一主键/同一worker_url，重试后会走幂等分支
            if db_err.is_unique_violation() {
                return true;
            }
            let Some(code) = db_err.code() else {
                return false;
            };
            if PG_TRANSIENT_CODES.contains(&code.as_ref()) {
                return true;
            }
            // SQLSTATE也是数字串，只有SQLite的错误码才按主码判断
            if db_err.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_none() {
                return false;
            }
            match code.parse::<i32>() {
                Ok(code) => matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED),
                Err(_) => false,
            }
        }
        _ => false,
    }
}

/// 统一的Result类型
pub type TraceQueueResult<T> = std::result::Result<T, TraceQueueError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;

    #[test]
    fn test_io_errors_are_transient() {
        let err = TraceQueueError::Database(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        )));
        assert!(err.is_transient());
        assert!(TraceQueueError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[derive(Debug)]
    struct CodedError {
        code: &'static str,
        kind: ErrorKind,
    }

    impl std::fmt::Display for CodedError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "database error {}", self.code)
        }
    }

    impl std::error::Error for CodedError {}

    impl DatabaseError for CodedError {
        fn message(&self) -> &str {
            "database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            match self.kind {
                ErrorKind::UniqueViolation => ErrorKind::UniqueViolation,
                _ => ErrorKind::Other,
            }
        }
    }

    fn coded(code: &'static str, kind: ErrorKind) -> TraceQueueError {
        TraceQueueError::Database(sqlx::Error::Database(Box::new(CodedError { code, kind })))
    }

    #[test]
    fn test_sqlstate_codes() {
        // 22021/22022 的低8位恰好是5/6，不能当作SQLite的BUSY/LOCKED
        assert!(!coded("22021", ErrorKind::Other).is_transient());
        assert!(!coded("22022", ErrorKind::Other).is_transient());
        assert!(!coded("42P01", ErrorKind::Other).is_transient());
        assert!(coded("40001", ErrorKind::Other).is_transient());
        assert!(coded("40P01", ErrorKind::Other).is_transient());
        assert!(coded("23505", ErrorKind::UniqueViolation).is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!TraceQueueError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!TraceQueueError::Database(sqlx::Error::PoolClosed).is_transient());
        assert!(!TraceQueueError::Configuration("bad url".to_string()).is_transient());
        assert!(!TraceQueueError::Cancelled.is_transient());
    }
}
