//! 把接收到的帧转换为索引文档

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracequeue_core::TraceMeta;

use crate::components::metrics_buffer::{Frame, MetricsSnapshot};
use crate::sink::SinkError;

pub const TIME_FIELD: &str = "Time";
pub const DOC_TYPE_KEY: &str = "doc_type";
pub const DOC_TYPE_METRIC: &str = "metric";
pub const DOC_TYPE_BUDGET: &str = "budget";
pub const SETTINGS_KEY: &str = "settings";

/// 归一化时间窗口 (起点, 终点)
pub type TimeWindow = (Option<f64>, Option<f64>);

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// 处理程序没有产生任何可导出的指标，Trace本身有问题
    #[error("没有可导出的指标: {0}")]
    NoMetrics(String),

    #[error("文档构建失败: {0}")]
    Document(String),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Document(err.to_string())
    }
}

/// 毫秒 → `HH:MM:SS.mmm`
pub fn format_time(millis: f64) -> String {
    let total = millis.max(0.0) as u64;
    let seconds = total / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60,
        total % 1000
    )
}

/// 单帧转换为文档，返回 (原始起始时间, 文档)
///
/// 缺少起止时间、结束不晚于开始或落在窗口之外的帧返回None。
pub fn frame_document(frame: &Frame, window: TimeWindow) -> Option<(f64, Map<String, Value>)> {
    let start = frame.frame_start?;
    let end = frame.frame_end?;
    if end <= start {
        return None;
    }

    let mut relative = start;
    if let Some(window_start) = window.0 {
        if start < window_start {
            return None;
        }
        relative -= window_start;
    }
    if let Some(window_end) = window.1 {
        if start > window_end {
            return None;
        }
    }

    let mut document = frame.data.clone();
    document.insert(TIME_FIELD.to_string(), Value::String(format_time(relative)));
    document.insert(
        DOC_TYPE_KEY.to_string(),
        Value::String(DOC_TYPE_METRIC.to_string()),
    );
    document.insert(SETTINGS_KEY.to_string(), frame.raw.clone());
    Some((start, document))
}

/// 生成全部待索引文档，元数据合并到每个文档中
///
/// 起始时间相同的帧只保留最后一个；存在预算时额外生成一个预算文档放在最前面。
pub fn build_documents(
    snapshot: &MetricsSnapshot,
    window: TimeWindow,
    meta: &TraceMeta,
) -> Result<Vec<Value>, ExportError> {
    let mut documents: Vec<Map<String, Value>> = Vec::new();
    let mut by_start: HashMap<u64, usize> = HashMap::new();

    for frame in &snapshot.frames {
        let Some((start, document)) = frame_document(frame, window) else {
            continue;
        };
        match by_start.get(&start.to_bits()) {
            Some(&position) => documents[position] = document,
            None => {
                by_start.insert(start.to_bits(), documents.len());
                documents.push(document);
            }
        }
    }

    if documents.is_empty() {
        return Err(ExportError::NoMetrics(format!(
            "{} 帧中没有可用的数据",
            snapshot.frames.len()
        )));
    }

    if !snapshot.budgets.is_empty() {
        let mut budget = snapshot.budgets.clone();
        budget.insert(
            DOC_TYPE_KEY.to_string(),
            Value::String(DOC_TYPE_BUDGET.to_string()),
        );
        budget.insert(
            SETTINGS_KEY.to_string(),
            Value::Object(snapshot.settings.clone()),
        );
        documents.insert(0, budget);
    }

    let meta = match serde_json::to_value(meta)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    Ok(documents
        .into_iter()
        .map(|mut document| {
            document.extend(meta.clone());
            Value::Object(document)
        })
        .collect())
}
