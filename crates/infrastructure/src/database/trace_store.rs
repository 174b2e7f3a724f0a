//! Trace状态存储
//!
//! 四个集合各对应一张表，记录本身以JSON文档保存在 `document` 列，
//! `trace_name`、`creation_date`、`worker_url` 单独成列用于主键、排序和租约唯一约束。
//! 所有函数都接收调用方的连接（通常是事务），便于多步操作组合成一个原子单元。

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{any::AnyRow, AnyConnection, Row};
use tracequeue_core::{LeaseRecord, ProcessedTraceRecord, TraceQueueResult, TraceRecord};
use tracing::debug;

use super::manager::DatabaseType;

/// 一个集合的类型描述
pub trait CollectionSpec: Send + Sync + 'static {
    type Record: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static;

    const TABLE: &'static str;

    fn key(record: &Self::Record) -> &str;

    fn creation_date(record: &Self::Record) -> DateTime<Utc>;

    fn worker_url(_record: &Self::Record) -> Option<&str> {
        None
    }
}

/// 排队中
pub struct Queued;

/// 处理中（租约）
pub struct Leases;

/// 处理成功
pub struct Ready;

/// 中毒
pub struct Poisoned;

impl CollectionSpec for Queued {
    type Record = TraceRecord;
    const TABLE: &'static str = "queued_traces";

    fn key(record: &TraceRecord) -> &str {
        &record.trace_name
    }

    fn creation_date(record: &TraceRecord) -> DateTime<Utc> {
        record.creation_date
    }
}

impl CollectionSpec for Leases {
    type Record = LeaseRecord;
    const TABLE: &'static str = "traces_in_processing";

    fn key(record: &LeaseRecord) -> &str {
        record.trace_name()
    }

    fn creation_date(record: &LeaseRecord) -> DateTime<Utc> {
        record.trace.creation_date
    }

    fn worker_url(record: &LeaseRecord) -> Option<&str> {
        Some(&record.worker_url)
    }
}

impl CollectionSpec for Ready {
    type Record = ProcessedTraceRecord;
    const TABLE: &'static str = "ready_traces";

    fn key(record: &ProcessedTraceRecord) -> &str {
        record.trace_name()
    }

    fn creation_date(record: &ProcessedTraceRecord) -> DateTime<Utc> {
        record.trace.creation_date
    }
}

impl CollectionSpec for Poisoned {
    type Record = ProcessedTraceRecord;
    const TABLE: &'static str = "poisoned_traces";

    fn key(record: &ProcessedTraceRecord) -> &str {
        record.trace_name()
    }

    fn creation_date(record: &ProcessedTraceRecord) -> DateTime<Utc> {
        record.trace.creation_date
    }
}

/// 创建四张表及索引，可重复执行
pub async fn migrate(conn: &mut AnyConnection) -> TraceQueueResult<()> {
    debug!("运行Trace存储迁移");

    for (table, worker_constraint) in [
        (Queued::TABLE, ""),
        (Leases::TABLE, " UNIQUE"),
        (Ready::TABLE, ""),
        (Poisoned::TABLE, ""),
    ] {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                trace_name TEXT PRIMARY KEY,
                creation_date BIGINT NOT NULL,
                worker_url TEXT{worker_constraint},
                document TEXT NOT NULL
            )"
        );
        sqlx::query(&create).execute(&mut *conn).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_creation_date ON {table}(creation_date)"
        );
        sqlx::query(&index).execute(&mut *conn).await?;
    }

    debug!("Trace存储迁移完成");
    Ok(())
}

fn to_micros(date: DateTime<Utc>) -> i64 {
    date.timestamp_micros()
}

fn decode<C: CollectionSpec>(row: &AnyRow) -> TraceQueueResult<C::Record> {
    let document: String = row.try_get("document")?;
    Ok(serde_json::from_str(&document)?)
}

/// 按 trace_name 查找，未找到返回None
pub async fn find<C: CollectionSpec>(
    conn: &mut AnyConnection,
    trace_name: &str,
) -> TraceQueueResult<Option<C::Record>> {
    let sql = format!("SELECT document FROM {} WHERE trace_name = $1", C::TABLE);
    let row = sqlx::query(&sql)
        .bind(trace_name)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(decode::<C>).transpose()
}

/// 按Worker地址查找租约
pub async fn find_lease_by_worker(
    conn: &mut AnyConnection,
    worker_url: &str,
) -> TraceQueueResult<Option<LeaseRecord>> {
    let sql = format!("SELECT document FROM {} WHERE worker_url = $1", Leases::TABLE);
    let row = sqlx::query(&sql)
        .bind(worker_url)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(decode::<Leases>).transpose()
}

/// 全表读取，按 creation_date 升序
pub async fn list<C: CollectionSpec>(
    conn: &mut AnyConnection,
) -> TraceQueueResult<Vec<C::Record>> {
    let sql = format!(
        "SELECT document FROM {} ORDER BY creation_date ASC, trace_name ASC",
        C::TABLE
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter().map(decode::<C>).collect()
}

/// 按主键插入或替换
pub async fn upsert<C: CollectionSpec>(
    conn: &mut AnyConnection,
    record: &C::Record,
) -> TraceQueueResult<()> {
    let document = serde_json::to_string(record)?;
    let sql = format!(
        "INSERT INTO {} (trace_name, creation_date, worker_url, document)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (trace_name) DO UPDATE SET
            creation_date = excluded.creation_date,
            worker_url = excluded.worker_url,
            document = excluded.document",
        C::TABLE
    );
    sqlx::query(&sql)
        .bind(C::key(record).to_string())
        .bind(to_micros(C::creation_date(record)))
        .bind(C::worker_url(record).map(str::to_string))
        .bind(document)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// 删除记录，返回是否删除了一行
pub async fn delete<C: CollectionSpec>(
    conn: &mut AnyConnection,
    trace_name: &str,
) -> TraceQueueResult<bool> {
    let sql = format!("DELETE FROM {} WHERE trace_name = $1", C::TABLE);
    let result = sqlx::query(&sql)
        .bind(trace_name)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count<C: CollectionSpec>(conn: &mut AnyConnection) -> TraceQueueResult<i64> {
    let sql = format!("SELECT COUNT(*) AS total FROM {}", C::TABLE);
    let row = sqlx::query(&sql).fetch_one(&mut *conn).await?;
    Ok(row.try_get::<i64, _>("total")?)
}

/// 取出最早入队的Trace并从队列删除
///
/// 单条 `DELETE ... RETURNING` 语句完成查找和删除，
/// PostgreSQL上子查询加 `FOR UPDATE SKIP LOCKED`，并发调用不会拿到同一条记录。
pub async fn dequeue_oldest(
    conn: &mut AnyConnection,
    db_type: DatabaseType,
) -> TraceQueueResult<Option<TraceRecord>> {
    let lock_clause = match db_type {
        DatabaseType::PostgreSQL => " FOR UPDATE SKIP LOCKED",
        DatabaseType::SQLite => "",
    };
    let sql = format!(
        "DELETE FROM {table} WHERE trace_name = (
            SELECT trace_name FROM {table}
            ORDER BY creation_date ASC, trace_name ASC
            LIMIT 1{lock_clause}
        ) RETURNING document",
        table = Queued::TABLE
    );
    let row = sqlx::query(&sql).fetch_optional(&mut *conn).await?;
    row.as_ref().map(decode::<Queued>).transpose()
}
