use chrono::{DateTime, Utc};
use tracequeue_core::{
    LeaseRecord, ProcessedTraceRecord, ProcessingReport, ReportOutcome, TraceQueueError,
    TraceQueueResult, TraceRecord, TraceStatus, WorkerConfiguration, UTRACE_EXT,
};
use tracequeue_infrastructure::{
    finish, trace_store, Leases, Poisoned, QueueOccupancy, Queued, Ready, StoreTransaction,
    TraceBroker, TxOutcome,
};
use tracing::{info, instrument, warn};

/// 去掉 `.utrace` 扩展名
pub fn normalize_trace_name(trace_name: &str) -> &str {
    let trimmed = trace_name.trim();
    trimmed.strip_suffix(UTRACE_EXT).unwrap_or(trimmed)
}

/// Worker上报的处理结果去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ready,
    Poisoned,
    Release,
}

impl Settlement {
    fn operation(self) -> &'static str {
        match self {
            Settlement::Ready => "report_ready",
            Settlement::Poisoned => "mark_poisoned",
            Settlement::Release => "release_from_worker",
        }
    }
}

/// Manager端的Trace队列服务
///
/// 所有跨请求的约束由存储事务保证，服务本身不持有锁。
#[derive(Debug, Clone)]
pub struct TraceQueueService {
    broker: TraceBroker,
    default_worker_configuration: WorkerConfiguration,
}

impl TraceQueueService {
    pub fn new(broker: TraceBroker, default_worker_configuration: WorkerConfiguration) -> Self {
        Self {
            broker,
            default_worker_configuration,
        }
    }

    pub fn broker(&self) -> &TraceBroker {
        &self.broker
    }

    /// 入队，使用当前时间作为入队时间
    pub async fn enqueue(
        &self,
        trace_name: &str,
        worker_configuration: Option<WorkerConfiguration>,
    ) -> TraceQueueResult<TraceRecord> {
        self.enqueue_at(trace_name, worker_configuration, Utc::now())
            .await
    }

    /// 入队
    ///
    /// - 已在队列中：原样返回
    /// - 正在处理：返回租约中的记录
    /// - 已完成或中毒：人工重新入队，之前的处理报告转入history
    #[instrument(skip(self, worker_configuration))]
    pub async fn enqueue_at(
        &self,
        trace_name: &str,
        worker_configuration: Option<WorkerConfiguration>,
        creation_date: DateTime<Utc>,
    ) -> TraceQueueResult<TraceRecord> {
        let trace_name = normalize_trace_name(trace_name);
        if trace_name.is_empty() {
            return Err(TraceQueueError::InvalidRequest(
                "trace_name不能为空".to_string(),
            ));
        }
        let explicit = &worker_configuration;
        let default = &self.default_worker_configuration;

        self.broker
            .transaction("enqueue", |mut tx| async move {
                if let Some(existing) = trace_store::find::<Queued>(&mut tx, trace_name).await? {
                    return finish(tx, existing);
                }
                if let Some(lease) = trace_store::find::<Leases>(&mut tx, trace_name).await? {
                    info!("Trace {} 正在由 {} 处理，不重复入队", trace_name, lease.worker_url);
                    return finish(tx, lease.into_queued());
                }

                let mut processed = trace_store::find::<Ready>(&mut tx, trace_name).await?;
                if processed.is_some() {
                    trace_store::delete::<Ready>(&mut tx, trace_name).await?;
                } else {
                    processed = trace_store::find::<Poisoned>(&mut tx, trace_name).await?;
                    if processed.is_some() {
                        trace_store::delete::<Poisoned>(&mut tx, trace_name).await?;
                    }
                }

                let record = match processed {
                    Some(processed) => {
                        info!(
                            "人工重新入队 {}，保留 {} 条处理报告",
                            trace_name,
                            processed.processing_reports.len()
                        );
                        let mut record = processed.into_requeued(creation_date);
                        if let Some(configuration) = explicit {
                            record.worker_configuration = Some(configuration.clone());
                        } else if record.worker_configuration.is_none() {
                            record.worker_configuration = Some(default.clone());
                        }
                        record
                    }
                    None => TraceRecord::new(
                        trace_name,
                        Some(explicit.clone().unwrap_or_else(|| default.clone())),
                    )
                    .with_creation_date(creation_date),
                };

                trace_store::upsert::<Queued>(&mut tx, &record).await?;
                finish(tx, record)
            })
            .await
    }

    /// 获取租约
    ///
    /// Worker已持有租约时返回同一个Trace；否则取出最早入队的Trace并记录租约。
    /// 队列为空时返回None。
    #[instrument(skip(self))]
    pub async fn acquire_lease(&self, worker_url: &str) -> TraceQueueResult<Option<TraceRecord>> {
        if worker_url.trim().is_empty() {
            return Err(TraceQueueError::InvalidRequest(
                "worker url不能为空".to_string(),
            ));
        }
        let db_type = self.broker.database_type();

        let acquired = self
            .broker
            .transaction("acquire_lease", |mut tx| async move {
                if let Some(lease) = trace_store::find_lease_by_worker(&mut tx, worker_url).await? {
                    return finish(tx, Some((lease.into_queued(), false)));
                }
                let Some(record) = trace_store::dequeue_oldest(&mut tx, db_type).await? else {
                    return finish(tx, None);
                };
                let lease = record.clone().into_lease(worker_url);
                trace_store::upsert::<Leases>(&mut tx, &lease).await?;
                finish(tx, Some((record, true)))
            })
            .await?;

        Ok(acquired.map(|(record, fresh)| {
            if fresh {
                info!("Worker {} 获取Trace {}", worker_url, record.trace_name);
            }
            record
        }))
    }

    pub async fn report_ready(&self, report: ProcessingReport) -> TraceQueueResult<ReportOutcome> {
        self.settle(report, Settlement::Ready).await
    }

    pub async fn mark_poisoned(&self, report: ProcessingReport) -> TraceQueueResult<ReportOutcome> {
        self.settle(report, Settlement::Poisoned).await
    }

    pub async fn release_from_worker(
        &self,
        report: ProcessingReport,
    ) -> TraceQueueResult<ReportOutcome> {
        self.settle(report, Settlement::Release).await
    }

    /// 按租约处理Worker的上报
    ///
    /// 租约不存在或属于其他Worker的上报视为过期，记录日志后忽略。
    #[instrument(skip(self, report), fields(trace_name = %report.trace_name, worker = %report.worker.url))]
    async fn settle(
        &self,
        mut report: ProcessingReport,
        settlement: Settlement,
    ) -> TraceQueueResult<ReportOutcome> {
        report.trace_name = normalize_trace_name(&report.trace_name).to_string();
        report.processed_date = Some(Utc::now());
        let report = &report;

        let outcome = self
            .broker
            .transaction(settlement.operation(), |mut tx| async move {
                let lease = trace_store::find::<Leases>(&mut tx, &report.trace_name).await?;
                let lease = match lease {
                    Some(lease) if lease.worker_url == report.worker.url => lease,
                    other => {
                        warn!(
                            "忽略过期的上报: Trace {} 当前租约持有者 {:?}",
                            report.trace_name,
                            other.map(|lease| lease.worker_url)
                        );
                        return finish(tx, ReportOutcome::Stale);
                    }
                };
                apply_settlement(tx, lease, report, settlement).await
            })
            .await?;

        if outcome == ReportOutcome::Applied {
            info!(
                "{}: {} (result={})",
                settlement.operation(),
                report.trace_name,
                report.result.result
            );
        }
        Ok(outcome)
    }

    /// 查询状态，按 queued → in_progress → processed → poisoned 顺序判定
    pub async fn get_status(&self, trace_name: &str) -> TraceQueueResult<TraceStatus> {
        let trace_name = normalize_trace_name(trace_name);
        self.broker
            .transaction("get_status", |mut tx| async move {
                let status = if trace_store::find::<Queued>(&mut tx, trace_name)
                    .await?
                    .is_some()
                {
                    TraceStatus::Queued
                } else if trace_store::find::<Leases>(&mut tx, trace_name)
                    .await?
                    .is_some()
                {
                    TraceStatus::InProgress
                } else if trace_store::find::<Ready>(&mut tx, trace_name)
                    .await?
                    .is_some()
                {
                    TraceStatus::Processed
                } else if trace_store::find::<Poisoned>(&mut tx, trace_name)
                    .await?
                    .is_some()
                {
                    TraceStatus::Poisoned
                } else {
                    TraceStatus::NotFound
                };
                finish(tx, status)
            })
            .await
    }

    /// 排队中的Trace，按入队顺序
    pub async fn list_queued(&self) -> TraceQueueResult<Vec<TraceRecord>> {
        self.broker.list::<Queued>().await
    }

    pub async fn list_in_progress(&self) -> TraceQueueResult<Vec<LeaseRecord>> {
        self.broker.list::<Leases>().await
    }

    /// 已完成的Trace，按最后一次处理时间排序
    pub async fn list_ready(&self) -> TraceQueueResult<Vec<ProcessedTraceRecord>> {
        let mut records = self.broker.list::<Ready>().await?;
        records.sort_by_key(|record| record.last_processed_date());
        Ok(records)
    }

    pub async fn list_poisoned(&self) -> TraceQueueResult<Vec<ProcessedTraceRecord>> {
        let mut records = self.broker.list::<Poisoned>().await?;
        records.sort_by_key(|record| record.last_processed_date());
        Ok(records)
    }

    /// 从队列中移除，返回是否存在
    pub async fn drop_queued(&self, trace_name: &str) -> TraceQueueResult<bool> {
        let trace_name = normalize_trace_name(trace_name);
        let dropped = self.broker.delete::<Queued>(trace_name).await?;
        if dropped {
            info!("从队列移除 {}", trace_name);
        }
        Ok(dropped)
    }

    pub async fn occupancy(&self) -> TraceQueueResult<QueueOccupancy> {
        self.broker.occupancy().await
    }
}

async fn apply_settlement(
    mut tx: StoreTransaction,
    lease: LeaseRecord,
    report: &ProcessingReport,
    settlement: Settlement,
) -> TxOutcome<ReportOutcome> {
    let trace_name = report.trace_name.as_str();
    match settlement {
        Settlement::Ready => {
            let mut processed = ProcessedTraceRecord::from_trace(lease.into_queued());
            processed.append_report(report.clone());
            trace_store::upsert::<Ready>(&mut tx, &processed).await?;
        }
        Settlement::Poisoned => {
            let mut processed = ProcessedTraceRecord::from_trace(lease.into_queued());
            processed.append_report(report.clone());
            trace_store::upsert::<Poisoned>(&mut tx, &processed).await?;
        }
        Settlement::Release => {
            trace_store::upsert::<Queued>(&mut tx, &lease.into_queued()).await?;
        }
    }
    trace_store::delete::<Leases>(&mut tx, trace_name).await?;
    finish(tx, ReportOutcome::Applied)
}
