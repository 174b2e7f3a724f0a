use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    cleanup::CleanupConfig,
    database::DatabaseConfig,
    manager_worker::{ManagerConfig, WorkerConfig},
    observability::ObservabilityConfig,
};
use crate::validation::ConfigValidator;

/// 环境变量前缀，例如 `TRACEQUEUE_WORKER__MANAGER_URL`
pub const ENV_PREFIX: &str = "TRACEQUEUE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub manager: ManagerConfig,
    pub worker: WorkerConfig,
    pub cleanup: CleanupConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/tracequeue.toml",
                "tracequeue.toml",
                "/etc/tracequeue/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("manager.ignore")
                .with_list_parse_key("worker.export.normalize")
                .with_list_parse_key("worker.processor.extra_args")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.manager.validate()?;
        self.worker.validate()?;
        self.cleanup.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.manager.bind_address, "0.0.0.0:30000");
        assert_eq!(config.worker.poll_interval_seconds, 30);
        assert!(!config.cleanup.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_toml() {
        let toml_str = r#"
[database]
url = "sqlite:///var/lib/tracequeue/queue.db?mode=rwc"

[manager]
trace_sessions_dir = "/srv/traces"
enqueue_unprocessed_on_start = true
ignore = ["warmup"]

[manager.default_worker_configuration]
elastic = ["http://es-1:9200", "http://es-2:9200"]
dashboard = "http://grafana:3000"

[worker]
manager_url = "http://manager:30000"
retry_delay_seconds = 10

[worker.processor]
executable = "file:///opt/insights/UnrealInsights"
gui = true

[worker.export]
normalize = ["LoadingStart", "LoadingEnd"]
same_index = true

[cleanup]
interval_hours = 6.0
master_days = 30.0
"#;

        let config = AppConfig::from_toml(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.manager.trace_sessions_dir, "/srv/traces");
        assert!(config.manager.enqueue_unprocessed_on_start);
        assert_eq!(config.manager.default_worker_configuration.elastic.len(), 2);
        assert_eq!(config.worker.retry_delay_seconds, 10);
        assert_eq!(config.worker.poll_interval_seconds, 30);
        assert!(config.worker.processor.gui);
        assert_eq!(config.worker.export.normalize.len(), 2);
        assert!(config.cleanup.is_enabled());
        assert_eq!(config.cleanup.release_days, None);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let toml_str = r#"
[worker]
poll_interval_seconds = 0
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[manager]\nbind_address = \"127.0.0.1:31000\"\n[observability]\nlog_format = \"json\""
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.manager.bind_address, "127.0.0.1:31000");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AppConfig::load(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.worker.manager_url, config.worker.manager_url);
    }
}
