use std::future::Future;

use sqlx::AnyPool;
use sqlx::{Any, Transaction};
use tracequeue_core::{
    retry_with, CancellationToken, LeaseRecord, RetryError, RetryPolicy, TraceQueueError,
    TraceQueueResult, TraceRecord,
};
use tracing::{debug, instrument};

use crate::database::trace_store::{self, CollectionSpec, Leases, Poisoned, Queued, Ready};
use crate::database::{DatabaseManager, DatabaseType};

/// 存储事务
pub type StoreTransaction = Transaction<'static, Any>;

/// 事务闭包的返回值：事务本身交还给调用方提交
pub type TxOutcome<T> = TraceQueueResult<(StoreTransaction, T)>;

/// 结束事务闭包，交还事务和结果
pub fn finish<T>(tx: StoreTransaction, value: T) -> TxOutcome<T> {
    Ok((tx, value))
}

/// 各集合的记录数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOccupancy {
    pub queued: i64,
    pub leased: i64,
    pub ready: i64,
    pub poisoned: i64,
}

/// Trace状态代理
///
/// 对存储的所有访问都经过这里。每次调用在独立事务中执行，
/// 遇到瞬时错误（锁竞争、连接中断）时整个事务立即重试，直到成功或被取消；
/// 永久错误直接返回调用方。
#[derive(Debug, Clone)]
pub struct TraceBroker {
    pool: AnyPool,
    db_type: DatabaseType,
    cancel: CancellationToken,
}

impl TraceBroker {
    pub fn new(db: &DatabaseManager) -> Self {
        Self {
            pool: db.pool().clone(),
            db_type: db.database_type(),
            cancel: CancellationToken::new(),
        }
    }

    /// 关闭时取消仍在重试中的调用
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    pub async fn migrate(&self) -> TraceQueueResult<()> {
        self.transaction("migrate", |mut tx| async move {
            trace_store::migrate(&mut tx).await?;
            finish(tx, ())
        })
        .await
    }

    /// 在一个可重试的事务中执行多步操作
    ///
    /// 闭包接收新开启的事务，完成后连同结果一起交还；返回Ok时提交，
    /// 返回Err或中途丢弃时回滚。闭包可能被执行多次，不能有存储以外的副作用。
    pub async fn transaction<T, F, Fut>(&self, operation: &str, f: F) -> TraceQueueResult<T>
    where
        F: Fn(StoreTransaction) -> Fut,
        Fut: Future<Output = TxOutcome<T>>,
    {
        let pool = &self.pool;
        let f = &f;
        let result = retry_with(
            operation,
            &RetryPolicy::immediate(),
            &self.cancel,
            TraceQueueError::is_transient,
            || async move {
                let tx = pool.begin().await?;
                let (tx, value) = f(tx).await?;
                tx.commit().await?;
                Ok::<T, TraceQueueError>(value)
            },
        )
        .await;

        match result {
            Ok(value) => Ok(value),
            Err(RetryError::Permanent(err)) | Err(RetryError::Exhausted { last: err, .. }) => {
                Err(err)
            }
            Err(RetryError::Cancelled) => Err(TraceQueueError::Cancelled),
        }
    }

    pub async fn find<C: CollectionSpec>(
        &self,
        trace_name: &str,
    ) -> TraceQueueResult<Option<C::Record>> {
        self.transaction("find", |mut tx| async move {
            let record = trace_store::find::<C>(&mut tx, trace_name).await?;
            finish(tx, record)
        })
        .await
    }

    pub async fn find_lease_by_worker(
        &self,
        worker_url: &str,
    ) -> TraceQueueResult<Option<LeaseRecord>> {
        self.transaction("find_lease_by_worker", |mut tx| async move {
            let lease = trace_store::find_lease_by_worker(&mut tx, worker_url).await?;
            finish(tx, lease)
        })
        .await
    }

    pub async fn list<C: CollectionSpec>(&self) -> TraceQueueResult<Vec<C::Record>> {
        self.transaction("list", |mut tx| async move {
            let records = trace_store::list::<C>(&mut tx).await?;
            finish(tx, records)
        })
        .await
    }

    pub async fn upsert<C: CollectionSpec>(&self, record: &C::Record) -> TraceQueueResult<()> {
        self.transaction("upsert", |mut tx| async move {
            trace_store::upsert::<C>(&mut tx, record).await?;
            finish(tx, ())
        })
        .await
    }

    pub async fn delete<C: CollectionSpec>(&self, trace_name: &str) -> TraceQueueResult<bool> {
        self.transaction("delete", |mut tx| async move {
            let deleted = trace_store::delete::<C>(&mut tx, trace_name).await?;
            finish(tx, deleted)
        })
        .await
    }

    pub async fn count<C: CollectionSpec>(&self) -> TraceQueueResult<i64> {
        self.transaction("count", |mut tx| async move {
            let total = trace_store::count::<C>(&mut tx).await?;
            finish(tx, total)
        })
        .await
    }

    /// 原子地取出最早入队的Trace
    #[instrument(skip(self))]
    pub async fn dequeue_oldest(&self) -> TraceQueueResult<Option<TraceRecord>> {
        let db_type = self.db_type;
        let record = self
            .transaction("dequeue_oldest", |mut tx| async move {
                let record = trace_store::dequeue_oldest(&mut tx, db_type).await?;
                finish(tx, record)
            })
            .await?;
        if let Some(record) = &record {
            debug!("出队: {}", record.trace_name);
        }
        Ok(record)
    }

    /// 四个集合的记录数，在同一事务中读取
    pub async fn occupancy(&self) -> TraceQueueResult<QueueOccupancy> {
        self.transaction("occupancy", |mut tx| async move {
            let occupancy = QueueOccupancy {
                queued: trace_store::count::<Queued>(&mut tx).await?,
                leased: trace_store::count::<Leases>(&mut tx).await?,
                ready: trace_store::count::<Ready>(&mut tx).await?,
                poisoned: trace_store::count::<Poisoned>(&mut tx).await?,
            };
            finish(tx, occupancy)
        })
        .await
    }
}
