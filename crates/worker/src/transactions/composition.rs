use tracequeue_core::CancellationToken;
use tracing::{error, info};

use super::{TraceTransaction, TransactionContext, TransactionError};

/// 失败的步骤及其错误
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionFailure {
    pub index: usize,
    pub step: &'static str,
    pub error: TransactionError,
}

/// 按顺序执行步骤，失败时逆序回滚已执行的步骤（包括失败的那一步）
pub struct TransactionComposition {
    steps: Vec<Box<dyn TraceTransaction>>,
}

impl TransactionComposition {
    pub fn new(steps: Vec<Box<dyn TraceTransaction>>) -> Self {
        Self { steps }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub async fn execute(
        &self,
        ctx: &mut TransactionContext,
        cancel: &CancellationToken,
    ) -> Result<(), CompositionFailure> {
        for (index, step) in self.steps.iter().enumerate() {
            info!("[{}] {} 开始", index, step.name());
            let outcome = if cancel.is_cancelled() {
                Err(TransactionError::cancelled())
            } else {
                step.execute(ctx, cancel).await
            };

            if let Err(error) = outcome {
                error!("[{}] {} 失败: {}", index, step.name(), error);
                self.rollback(ctx, index).await;
                return Err(CompositionFailure {
                    index,
                    step: step.name(),
                    error,
                });
            }
            info!("[{}] {} 完成", index, step.name());
        }

        for step in &self.steps {
            if let Err(e) = step.commit(ctx).await {
                error!("{} 提交失败: {}", step.name(), e);
            }
        }
        Ok(())
    }

    async fn rollback(&self, ctx: &mut TransactionContext, current: usize) {
        for step in self.steps[..=current].iter().rev() {
            if let Err(e) = step.rollback(ctx).await {
                error!("{} 回滚失败: {}", step.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct Recording {
        name: &'static str,
        fail: Option<TransactionError>,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TraceTransaction for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(
            &self,
            _ctx: &mut TransactionContext,
            _cancel: &CancellationToken,
        ) -> Result<(), TransactionError> {
            self.log.lock().unwrap().push(format!("execute {}", self.name));
            match &self.fail {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        }

        async fn commit(&self, _ctx: &mut TransactionContext) -> Result<(), TransactionError> {
            self.log.lock().unwrap().push(format!("commit {}", self.name));
            Ok(())
        }

        async fn rollback(&self, _ctx: &mut TransactionContext) -> Result<(), TransactionError> {
            self.log.lock().unwrap().push(format!("rollback {}", self.name));
            Err(TransactionError::unclassified("rollback failures are only logged"))
        }
    }

    fn composition(fail_at: Option<usize>, log: &Arc<Mutex<Vec<String>>>) -> TransactionComposition {
        let steps = ["acquire", "process", "export", "report"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                Box::new(Recording {
                    name,
                    fail: (fail_at == Some(i)).then(|| TransactionError::external("sink down")),
                    log: log.clone(),
                }) as Box<dyn TraceTransaction>
            })
            .collect();
        TransactionComposition::new(steps)
    }

    #[tokio::test]
    async fn test_success_commits_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = TransactionContext::new("w1:30001");
        composition(None, &log)
            .execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 8);
        assert_eq!(log[3], "execute report");
        assert_eq!(log[4], "commit acquire");
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = TransactionContext::new("w1:30001");
        let failure = composition(Some(2), &log)
            .execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.index, 2);
        assert_eq!(failure.step, "export");
        assert_eq!(failure.error, TransactionError::external("sink down"));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "execute acquire",
                "execute process",
                "execute export",
                "rollback export",
                "rollback process",
                "rollback acquire",
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        token.cancel();
        let mut ctx = TransactionContext::new("w1:30001");

        let failure = composition(None, &log)
            .execute(&mut ctx, &token)
            .await
            .unwrap_err();
        assert!(failure.error.is_cancelled());
        assert_eq!(*log.lock().unwrap(), vec!["rollback acquire"]);
    }
}
