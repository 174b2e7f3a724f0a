use std::path::Path;

use chrono::{DateTime, Utc};
use tracequeue_core::{TraceQueueResult, TraceStatus, UTRACE_EXT};
use tracing::{debug, info};

use crate::trace_service::TraceQueueService;

/// 把目录中尚未处理的Trace加入队列
///
/// 排队中、处理中和已完成的Trace保持不变；中毒的Trace会重新入队。
/// 文件修改时间作为入队时间，保证按采集顺序处理。返回入队数量。
pub async fn enqueue_unprocessed(
    service: &TraceQueueService,
    trace_sessions_dir: &Path,
    ignore: &[String],
) -> TraceQueueResult<usize> {
    info!("扫描未处理的Trace: {}", trace_sessions_dir.display());

    let mut enqueued = 0;
    let mut entries = tokio::fs::read_dir(trace_sessions_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some(trace_name) = file_name.strip_suffix(UTRACE_EXT) else {
            continue;
        };
        if ignore.iter().any(|name| name == trace_name) {
            debug!("忽略 {}", trace_name);
            continue;
        }

        match service.get_status(trace_name).await? {
            TraceStatus::NotFound | TraceStatus::Poisoned => {}
            status => {
                debug!("跳过 {} ({})", trace_name, status);
                continue;
            }
        }

        let modified: DateTime<Utc> = entry.metadata().await?.modified()?.into();
        service.enqueue_at(trace_name, None, modified).await?;
        enqueued += 1;
    }

    info!("已入队 {} 个未处理的Trace", enqueued);
    Ok(enqueued)
}
