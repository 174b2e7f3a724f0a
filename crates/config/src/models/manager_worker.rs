use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use tracequeue_core::{WorkerConfiguration, DEFAULT_PORT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub bind_address: String,
    /// Trace文件所在目录
    pub trace_sessions_dir: String,
    /// 入队时未指定配置的Trace使用的外部端点
    pub default_worker_configuration: WorkerConfiguration,
    /// 启动时把目录中尚未处理的Trace加入队列
    pub enqueue_unprocessed_on_start: bool,
    /// 扫描和清理时忽略的Trace名
    pub ignore: Vec<String>,
    /// 轮询Worker状态的超时时间
    pub worker_status_timeout_seconds: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{DEFAULT_PORT}"),
            trace_sessions_dir: "traces".to_string(),
            default_worker_configuration: WorkerConfiguration::default(),
            enqueue_unprocessed_on_start: false,
            ignore: Vec::new(),
            worker_status_timeout_seconds: 5,
        }
    }
}

impl ConfigValidator for ManagerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_socket_address(&self.bind_address, "manager.bind_address")?;
        ValidationUtils::validate_not_empty(&self.trace_sessions_dir, "manager.trace_sessions_dir")?;

        let endpoints = &self.default_worker_configuration;
        if endpoints.elastic.is_empty() {
            return Err(crate::ConfigError::Validation(
                "manager.default_worker_configuration.elastic cannot be empty".to_string(),
            ));
        }
        for url in &endpoints.elastic {
            ValidationUtils::validate_url(url, "manager.default_worker_configuration.elastic")?;
        }
        ValidationUtils::validate_url(
            &endpoints.dashboard,
            "manager.default_worker_configuration.dashboard",
        )?;

        ValidationUtils::validate_interval_seconds(
            self.worker_status_timeout_seconds,
            "manager.worker_status_timeout_seconds",
        )?;
        Ok(())
    }
}

/// Trace处理程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// 可执行文件，`file://` URL 或本地路径
    pub executable: String,
    pub gui: bool,
    pub extra_args: Vec<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            executable: "UnrealInsights-Win64-Shipping.exe".to_string(),
            gui: false,
            extra_args: Vec::new(),
        }
    }
}

/// 指标导出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub index_prefix: String,
    /// 归一化书签：[起始书签, 结束书签]
    pub normalize: Vec<String>,
    /// 索引已存在时复用而不是重建
    pub same_index: bool,
    /// 索引字段数上限，0表示不调整
    pub mapping_limit: u32,
    pub build: Option<String>,
    pub title: Option<String>,
    pub workstation: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            index_prefix: "prf".to_string(),
            normalize: Vec::new(),
            same_index: false,
            mapping_limit: 2000,
            build: None,
            title: None,
            workstation: None,
            request_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub bind_address: String,
    /// Manager用来访问此Worker的 host:port，未设置时使用主机名
    pub advertised_url: Option<String>,
    pub manager_url: String,
    pub trace_sessions_dir: String,
    pub poll_interval_seconds: u64,
    pub retry_delay_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub processor: ProcessorConfig,
    pub export: ExportConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:30001".to_string(),
            advertised_url: None,
            manager_url: format!("http://localhost:{DEFAULT_PORT}"),
            trace_sessions_dir: "traces".to_string(),
            poll_interval_seconds: 30,
            retry_delay_seconds: 30,
            shutdown_grace_seconds: 30,
            processor: ProcessorConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Worker的对外地址
    pub fn worker_url(&self) -> String {
        if let Some(url) = &self.advertised_url {
            return url.clone();
        }
        let port = self
            .bind_address
            .rsplit_once(':')
            .map(|(_, port)| port)
            .unwrap_or("30001");
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        format!("{host}:{port}")
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_socket_address(&self.bind_address, "worker.bind_address")?;
        if let Some(url) = &self.advertised_url {
            ValidationUtils::validate_socket_address(url, "worker.advertised_url")?;
        }
        ValidationUtils::validate_url(&self.manager_url, "worker.manager_url")?;
        ValidationUtils::validate_not_empty(&self.trace_sessions_dir, "worker.trace_sessions_dir")?;
        ValidationUtils::validate_interval_seconds(
            self.poll_interval_seconds,
            "worker.poll_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.retry_delay_seconds,
            "worker.retry_delay_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.shutdown_grace_seconds,
            "worker.shutdown_grace_seconds",
        )?;
        ValidationUtils::validate_not_empty(
            &self.processor.executable,
            "worker.processor.executable",
        )?;
        if self.export.normalize.len() > 2 {
            return Err(crate::ConfigError::Validation(
                "worker.export.normalize accepts at most a start and an end bookmark".to_string(),
            ));
        }
        ValidationUtils::validate_interval_seconds(
            self.export.request_timeout_seconds,
            "worker.export.request_timeout_seconds",
        )?;
        Ok(())
    }
}
