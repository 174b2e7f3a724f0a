use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 清理间隔的下限（秒）
pub const MIN_CLEANUP_INTERVAL_SECONDS: f64 = 1.0;

/// Trace文件保留策略，未设置的窗口表示永久保留
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// 清理间隔（小时），未设置时不启用清理
    pub interval_hours: Option<f64>,
    /// 启动时立即执行一次
    pub run_on_start: bool,
    /// master分支的保留天数
    pub master_days: Option<f64>,
    /// 发布版本（无分支）的保留天数
    pub release_days: Option<f64>,
    /// 其他功能分支的保留天数
    pub branches_days: Option<f64>,
}

impl CleanupConfig {
    pub fn is_enabled(&self) -> bool {
        self.interval_hours.is_some()
    }
}

impl ConfigValidator for CleanupConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_positive(self.interval_hours, "cleanup.interval_hours")?;
        if let Some(hours) = self.interval_hours {
            if hours * 3600.0 < MIN_CLEANUP_INTERVAL_SECONDS {
                return Err(crate::ConfigError::Validation(format!(
                    "cleanup.interval_hours must be at least {MIN_CLEANUP_INTERVAL_SECONDS} second"
                )));
            }
        }
        ValidationUtils::validate_positive(self.master_days, "cleanup.master_days")?;
        ValidationUtils::validate_positive(self.release_days, "cleanup.release_days")?;
        ValidationUtils::validate_positive(self.branches_days, "cleanup.branches_days")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_below_one_second_rejected() {
        let config = CleanupConfig {
            interval_hours: Some(1e-12),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CleanupConfig {
            interval_hours: Some(0.001),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        assert!(CleanupConfig::default().validate().is_ok());
    }
}
