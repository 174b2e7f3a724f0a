use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::CancellationToken;

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 两次尝试之间的固定间隔，零表示立即重试
    pub delay: Duration,
    /// 最大尝试次数，None表示无限重试
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// 立即无限重试，只依赖存储自身的等待
    pub fn immediate() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: None,
        }
    }

    /// 固定间隔无限重试
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("重试被取消")]
    Cancelled,

    #[error("{0}")]
    Permanent(E),

    #[error("重试{attempts}次后仍失败: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// 按分类器重试操作
///
/// `is_transient` 返回true的错误会被重试，其余错误立即返回。
/// 每次尝试前以及每次等待期间都会检查取消令牌。
pub async fn retry_with<T, E, Op, Fut, C>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_transient: C,
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let mut attempts: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempts += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_transient(&err) {
            return Err(RetryError::Permanent(err));
        }
        if let Some(max) = policy.max_attempts {
            if attempts >= max {
                return Err(RetryError::Exhausted {
                    attempts,
                    last: err,
                });
            }
        }

        if policy.delay.is_zero() {
            debug!("{operation_name} 遇到瞬时错误，立即重试 (第{attempts}次): {err}");
            tokio::task::yield_now().await;
        } else {
            warn!(
                "{operation_name} 失败，{}秒后重试 (第{attempts}次): {err}",
                policy.delay.as_secs()
            );
            if !cancel.sleep(policy.delay).await {
                return Err(RetryError::Cancelled);
            }
        }
    }
}
