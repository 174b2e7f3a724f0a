use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracequeue_config::ProcessorConfig;
use tracequeue_core::CancellationToken;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("不支持的处理程序地址: {0}")]
    UnsupportedExecutable(String),

    #[error("无法启动处理程序 {executable}: {reason}")]
    Spawn { executable: String, reason: String },

    #[error("Trace processing error. Process return code is {0:?}")]
    Exit(Option<i32>),

    #[error("处理被取消")]
    Cancelled,
}

/// 把Trace文件转换为指标流的外部能力
///
/// 实现负责启动处理程序并等待结束；指标通过HTTP推送到Worker的指标缓冲区。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TraceProcessor: Send + Sync {
    async fn process(
        &self,
        trace_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessorError>;
}

/// 与处理程序内部一致的Trace编号
pub fn trace_id(trace_name: &str) -> u32 {
    let mut hash: u64 = 5381;
    for c in trace_name.chars() {
        hash = (hash << 5).wrapping_add(hash).wrapping_add(c as u64);
    }
    (hash & 0xFFFF_FFFF) as u32
}

/// 以子进程方式运行处理程序
pub struct CommandTraceProcessor {
    executable: String,
    gui: bool,
    extra_args: Vec<String>,
    trace_sessions_dir: PathBuf,
}

impl CommandTraceProcessor {
    pub fn new(config: &ProcessorConfig, trace_sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: config.executable.clone(),
            gui: config.gui,
            extra_args: config.extra_args.clone(),
            trace_sessions_dir: trace_sessions_dir.into(),
        }
    }

    /// `file://` URL 或本地路径，其他scheme不支持
    pub fn resolve_executable(&self) -> Result<PathBuf, ProcessorError> {
        match Url::parse(&self.executable) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map_err(|_| ProcessorError::UnsupportedExecutable(self.executable.clone())),
            // 单字母scheme是Windows盘符
            Ok(url) if url.scheme().len() > 1 => {
                Err(ProcessorError::UnsupportedExecutable(self.executable.clone()))
            }
            _ => Ok(PathBuf::from(&self.executable)),
        }
    }

    pub fn arguments(&self, trace_name: &str) -> Vec<String> {
        let mut args = vec![
            format!("-OpenTraceId={}", trace_id(trace_name)),
            "-events".to_string(),
            "-AutoQuit".to_string(),
            format!("-TraceSessionsDir={}", self.trace_sessions_dir.display()),
        ];
        if !self.gui {
            args.push("-nullrhi".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl TraceProcessor for CommandTraceProcessor {
    async fn process(
        &self,
        trace_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessorError> {
        let executable = self.resolve_executable()?;
        let args = self.arguments(trace_name);
        info!("运行: {} {}", executable.display(), args.join(" "));

        let spawn_error = |e: std::io::Error| ProcessorError::Spawn {
            executable: executable.display().to_string(),
            reason: e.to_string(),
        };
        let mut child = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(spawn_error)?;
                if status.success() {
                    info!("处理程序正常退出: {}", trace_name);
                    Ok(())
                } else {
                    Err(ProcessorError::Exit(status.code()))
                }
            }
            _ = cancel.cancelled() => {
                warn!("处理被取消，终止处理程序: {}", trace_name);
                if let Err(e) = child.kill().await {
                    warn!("终止处理程序失败: {}", e);
                }
                Err(ProcessorError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(executable: &str) -> CommandTraceProcessor {
        let config = ProcessorConfig {
            executable: executable.to_string(),
            ..Default::default()
        };
        CommandTraceProcessor::new(&config, "/data/traces")
    }

    #[test]
    fn test_trace_id_matches_djb2() {
        assert_eq!(trace_id(""), 5381);
        assert_eq!(trace_id("a"), 177_670);
        assert_eq!(trace_id("ab"), 5_863_208);
    }

    #[test]
    fn test_arguments() {
        let mut p = processor("insights.exe");
        p.extra_args = vec!["-log".to_string()];
        assert_eq!(
            p.arguments("a"),
            vec![
                "-OpenTraceId=177670".to_string(),
                "-events".to_string(),
                "-AutoQuit".to_string(),
                "-TraceSessionsDir=/data/traces".to_string(),
                "-nullrhi".to_string(),
                "-log".to_string(),
            ]
        );

        p.gui = true;
        assert!(!p.arguments("a").contains(&"-nullrhi".to_string()));
    }

    #[test]
    fn test_resolve_executable() {
        assert_eq!(
            processor("UnrealInsights-Win64-Shipping.exe").resolve_executable().unwrap(),
            PathBuf::from("UnrealInsights-Win64-Shipping.exe")
        );
        assert!(matches!(
            processor("ssh://build@host/insights").resolve_executable(),
            Err(ProcessorError::UnsupportedExecutable(_))
        ));
        #[cfg(unix)]
        assert_eq!(
            processor("file:///opt/insights/run").resolve_executable().unwrap(),
            PathBuf::from("/opt/insights/run")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status() {
        let token = CancellationToken::new();
        assert!(processor("true").process("t", &token).await.is_ok());
        assert!(matches!(
            processor("false").process("t", &token).await,
            Err(ProcessorError::Exit(Some(1)))
        ));
        assert!(matches!(
            processor("/nonexistent/insights").process("t", &token).await,
            Err(ProcessorError::Spawn { .. })
        ));
    }
}
