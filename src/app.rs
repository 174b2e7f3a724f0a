use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::broadcast};
use tracequeue_api::{create_manager_app, create_worker_app, ManagerState, WorkerNodeState};
use tracequeue_config::AppConfig;
use tracequeue_core::CancellationToken;
use tracequeue_infrastructure::{
    install_prometheus_recorder, CleanupService, DatabaseManager, MetricsCollector, TraceBroker,
};
use tracequeue_manager::{enqueue_unprocessed, TraceQueueService, WorkerRegistry};
use tracequeue_worker::{
    CommandTraceProcessor, ElasticsearchSink, HttpManagerClient, MetricsBuffer, WorkLoop,
    WorkLoopSettings, WorkerLifecycle, WorkerState,
};
use tracing::{info, warn};

/// Worker调用Manager接口的超时时间
const MANAGER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 应用运行模式
#[derive(Debug, Clone, Copy)]
pub enum AppMode {
    /// 队列、租约和清理
    Manager,
    /// 处理循环和指标接收端
    Worker,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        Self { config, mode }
    }

    /// 运行应用程序，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Manager => self.run_manager(shutdown_rx).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
        }
    }

    async fn run_manager(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let manager = &self.config.manager;

        // Prometheus记录器需要在任何指标写入前安装
        let prometheus = if self.config.observability.metrics_enabled {
            Some(install_prometheus_recorder().context("安装Prometheus记录器失败")?)
        } else {
            None
        };

        let db = DatabaseManager::from_config(&self.config.database)
            .await
            .context("连接数据库失败")?;
        // 关闭时让仍在重试存储错误的请求尽快返回
        let store_cancel = CancellationToken::new();
        let broker = TraceBroker::new(&db).with_cancellation(store_cancel.clone());
        broker.migrate().await.context("初始化数据库表失败")?;

        let traces = Arc::new(TraceQueueService::new(
            broker.clone(),
            manager.default_worker_configuration.clone(),
        ));

        if manager.enqueue_unprocessed_on_start {
            match enqueue_unprocessed(
                &traces,
                Path::new(&manager.trace_sessions_dir),
                &manager.ignore,
            )
            .await
            {
                Ok(count) => info!("启动时入队 {} 个未处理的Trace", count),
                Err(e) => warn!("扫描未处理的Trace失败: {}", e),
            }
        }

        let mut cleanup = CleanupService::new(
            broker,
            &manager.trace_sessions_dir,
            manager.ignore.clone(),
            self.config.cleanup.clone(),
        );
        cleanup.start().await.context("启动清理服务失败")?;

        let state = ManagerState {
            traces,
            workers: Arc::new(WorkerRegistry::new(Duration::from_secs(
                manager.worker_status_timeout_seconds,
            ))),
            collector: Arc::new(MetricsCollector::new()),
            prometheus,
        };
        let app = create_manager_app(state);

        let listener = TcpListener::bind(&manager.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", manager.bind_address))?;
        info!("Manager服务器启动在: {}", manager.bind_address);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                store_cancel.cancel();
            })
            .await;

        cleanup.stop().await;
        served.context("Manager服务器异常退出")?;

        info!("Manager服务已停止");
        Ok(())
    }

    async fn run_worker(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let worker = &self.config.worker;
        let worker_url = worker.worker_url();
        info!("启动Worker: {}", worker_url);

        let buffer = MetricsBuffer::new();
        let state = WorkerState::new(worker_url);

        let work_loop = WorkLoop::new(
            Arc::new(HttpManagerClient::new(
                &worker.manager_url,
                MANAGER_REQUEST_TIMEOUT,
            )),
            Arc::new(CommandTraceProcessor::new(
                &worker.processor,
                &worker.trace_sessions_dir,
            )),
            Arc::new(ElasticsearchSink::new(&worker.export)),
            buffer.clone(),
            state.clone(),
            WorkLoopSettings::from_config(worker),
        );
        let lifecycle = Arc::new(WorkerLifecycle::new(
            Arc::new(work_loop),
            state,
            Duration::from_secs(worker.shutdown_grace_seconds),
        ));
        lifecycle.start().await.context("启动处理循环失败")?;

        let app = create_worker_app(WorkerNodeState {
            lifecycle: Arc::clone(&lifecycle),
            buffer,
        });

        let listener = TcpListener::bind(&worker.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", worker.bind_address))?;
        info!("Worker服务器启动在: {}", worker.bind_address);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;

        // 处理中的Trace会在停止时归还给Manager
        lifecycle.stop().await.context("停止处理循环失败")?;
        served.context("Worker服务器异常退出")?;

        info!("Worker服务已停止");
        Ok(())
    }
}
