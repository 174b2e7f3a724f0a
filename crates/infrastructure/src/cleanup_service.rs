use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tokio::time::{interval_at, Instant};
use tracequeue_config::CleanupConfig;
use tracequeue_core::{ProcessedTraceRecord, TraceQueueResult, UTRACE_EXT};
use tracing::{debug, error, info, warn};

use crate::broker::TraceBroker;
use crate::database::{Leases, Poisoned, Queued, Ready};

const SECONDS_IN_DAY: f64 = 24.0 * 60.0 * 60.0;

/// 按分支选择的保留窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionScenario {
    Master,
    Release,
    Branch,
}

/// Trace文件保留策略，窗口为None表示永久保留
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    pub master: Option<Duration>,
    pub release: Option<Duration>,
    pub branches: Option<Duration>,
}

fn days(value: Option<f64>) -> Option<Duration> {
    value.map(|d| Duration::milliseconds((d * SECONDS_IN_DAY * 1000.0) as i64))
}

impl RetentionPolicy {
    pub fn from_config(config: &CleanupConfig) -> Self {
        Self {
            master: days(config.master_days),
            release: days(config.release_days),
            branches: days(config.branches_days),
        }
    }

    /// master → master窗口，空分支 → 发布窗口，其他 → 分支窗口
    pub fn window_for(&self, branch: Option<&str>) -> (RetentionScenario, Option<Duration>) {
        match branch {
            Some("master") => (RetentionScenario::Master, self.master),
            None | Some("") => (RetentionScenario::Release, self.release),
            Some(_) => (RetentionScenario::Branch, self.branches),
        }
    }

    /// 根据最后一次处理报告判断文件是否过期
    pub fn is_expired(&self, record: &ProcessedTraceRecord, now: DateTime<Utc>) -> bool {
        let Some(report) = record.last_report() else {
            return false;
        };
        let Some(processed_date) = report.processed_date else {
            return false;
        };
        let (scenario, window) = self.window_for(report.trace_meta.branch.as_deref());
        debug!(
            "Trace {}: 场景 {:?}, 分支 {:?}, 保留窗口 {:?}, 处理时间 {}",
            record.trace_name(),
            scenario,
            report.trace_meta.branch,
            window,
            processed_date
        );
        match window {
            Some(window) => now - processed_date > window,
            None => false,
        }
    }
}

/// 一次清理的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub scanned: usize,
    pub deleted: usize,
    pub kept: usize,
    pub active: usize,
    pub ignored: usize,
    pub unknown: usize,
    pub errors: usize,
}

/// Trace文件清理服务
///
/// 定期扫描Trace目录，删除已处理且超过保留窗口的Trace文件。
/// 排队中和处理中的Trace不会被删除；存储里没有任何记录的文件只记录日志，不删除。
pub struct CleanupService {
    broker: TraceBroker,
    trace_sessions_dir: PathBuf,
    ignore: Vec<String>,
    config: CleanupConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    cleanup_handle: Option<tokio::task::JoinHandle<()>>,
}

/// 清理周期，不足一秒时按一秒计算
fn cleanup_period(interval_hours: f64) -> std::time::Duration {
    std::time::Duration::try_from_secs_f64(interval_hours * 3600.0)
        .unwrap_or_default()
        .max(std::time::Duration::from_secs(1))
}

impl CleanupService {
    pub fn new(
        broker: TraceBroker,
        trace_sessions_dir: impl Into<PathBuf>,
        ignore: Vec<String>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            broker,
            trace_sessions_dir: trace_sessions_dir.into(),
            ignore,
            config,
            shutdown_tx: None,
            cleanup_handle: None,
        }
    }

    /// 启动清理服务，未配置间隔时不启动
    pub async fn start(&mut self) -> TraceQueueResult<()> {
        let Some(interval_hours) = self.config.interval_hours else {
            info!("Cleanup service is disabled");
            return Ok(());
        };

        info!("Starting cleanup service with config: {:?}", self.config);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let broker = self.broker.clone();
        let dir = self.trace_sessions_dir.clone();
        let ignore = self.ignore.clone();
        let policy = RetentionPolicy::from_config(&self.config);
        let period = cleanup_period(interval_hours);
        let start = if self.config.run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };

        let handle = tokio::spawn(async move {
            let mut cleanup_interval = interval_at(start, period);

            loop {
                tokio::select! {
                    _ = cleanup_interval.tick() => {
                        if let Err(e) = Self::perform_cleanup(&broker, &dir, &ignore, &policy, Utc::now()).await {
                            error!("Cleanup failed: {}", e);
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Cleanup service shutdown requested");
                        break;
                    }
                }
            }
        });

        self.cleanup_handle = Some(handle);
        info!("Cleanup service started successfully");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.cleanup_handle.take() {
            if let Err(e) = handle.await {
                warn!("Error waiting for cleanup service to stop: {}", e);
            }
        }

        info!("Cleanup service stopped");
    }

    /// 立即执行一次清理
    pub async fn cleanup_once(&self, now: DateTime<Utc>) -> TraceQueueResult<CleanupStats> {
        let policy = RetentionPolicy::from_config(&self.config);
        Self::perform_cleanup(
            &self.broker,
            &self.trace_sessions_dir,
            &self.ignore,
            &policy,
            now,
        )
        .await
    }

    async fn perform_cleanup(
        broker: &TraceBroker,
        dir: &Path,
        ignore: &[String],
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> TraceQueueResult<CleanupStats> {
        let start_time = std::time::Instant::now();
        let mut stats = CleanupStats::default();

        info!("Cleanup traces: started in {}", dir.display());

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(trace_name) = file_name.strip_suffix(UTRACE_EXT) else {
                continue;
            };
            stats.scanned += 1;

            if ignore.iter().any(|name| name == trace_name) {
                debug!("Cleanup traces: ignore trace {}", trace_name);
                stats.ignored += 1;
                continue;
            }

            if broker.find::<Queued>(trace_name).await?.is_some()
                || broker.find::<Leases>(trace_name).await?.is_some()
            {
                debug!("Cleanup traces: trace {} is queued or in progress", trace_name);
                stats.active += 1;
                continue;
            }

            let record = match broker.find::<Ready>(trace_name).await? {
                Some(record) => Some(record),
                None => broker.find::<Poisoned>(trace_name).await?,
            };
            let Some(record) = record else {
                warn!(
                    "Cleanup traces: no record for {} in ready or poisoned traces, keeping file",
                    trace_name
                );
                stats.unknown += 1;
                continue;
            };

            if !policy.is_expired(&record, now) {
                stats.kept += 1;
                continue;
            }

            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!("Cleanup traces: removed {}", path.display());
                    stats.deleted += 1;
                }
                Err(e) => {
                    error!("Cleanup traces: failed to delete {}: {}", path.display(), e);
                    stats.errors += 1;
                }
            }
        }

        info!(
            "Cleanup completed in {:?}: scanned {}, deleted {}, kept {}, active {}, unknown {}",
            start_time.elapsed(),
            stats.scanned,
            stats.deleted,
            stats.kept,
            stats.active,
            stats.unknown
        );

        Ok(stats)
    }
}
