use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracequeue_core::models::trace_meta::{METADATA_DELIMITER, METADATA_PREFIX};
use tracequeue_core::Bookmark;
use tracing::debug;

pub const FRAME_START_KEY: &str = "FrameStart";
pub const FRAME_END_KEY: &str = "FrameEnd";

/// 展开时从组合键中去掉的片段
const EXCLUDED_KEYS: [&str; 5] = ["_Children", "_Duration", "_Editor", "_Budgets", "_Value"];

/// `/performance_metrics/set/header` 的请求体
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct MetricsHeader {
    #[serde(rename = "MetricFramesCount", default)]
    pub metric_frames_count: u64,
}

/// 处理程序上报的一帧指标
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_start: Option<f64>,
    pub frame_end: Option<f64>,
    /// 展开后的指标，不含帧起止时间
    pub data: Map<String, Value>,
    /// 原始请求数据
    pub raw: Value,
}

impl Frame {
    pub fn from_raw(raw: Value) -> Self {
        let mut data = match &raw {
            Value::Object(map) => flatten(map),
            _ => Map::new(),
        };
        let frame_start = data.remove(FRAME_START_KEY).and_then(|v| v.as_f64());
        let frame_end = data.remove(FRAME_END_KEY).and_then(|v| v.as_f64());
        Self {
            frame_start,
            frame_end,
            data,
            raw,
        }
    }
}

/// 一次处理期间收到的全部指标
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub metric_names: Vec<String>,
    pub metadata_names: Vec<String>,
    pub bookmarks: Vec<Bookmark>,
    pub header_count: u64,
    pub frames: Vec<Frame>,
    /// 原始的性能配置
    pub settings: Map<String, Value>,
    pub budgets: Map<String, Value>,
}

impl MetricsSnapshot {
    /// 有指标名、帧数已知且全部帧都已到达
    pub fn is_available(&self) -> bool {
        !self.metric_names.is_empty()
            && self.header_count > 0
            && self.frames.len() as u64 == self.header_count
    }

    pub fn summary(&self) -> String {
        format!(
            "MetricsNamesCount: {} MetricsHeader: {} MetricsCount: {}",
            self.metric_names.len(),
            self.header_count,
            self.frames.len()
        )
    }
}

/// 把嵌套对象展开为一层，键用 `_` 连接并去掉 [`EXCLUDED_KEYS`] 片段
pub fn flatten(map: &Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    for (key, value) in map {
        match value {
            Value::Object(nested) => {
                for (sub_key, sub_value) in flatten(nested) {
                    let mut joined = format!("{key}_{sub_key}");
                    for excluded in EXCLUDED_KEYS {
                        joined = joined.replace(excluded, "");
                    }
                    flat.insert(joined, sub_value);
                }
            }
            other => {
                flat.insert(key.clone(), other.clone());
            }
        }
    }
    flat
}

/// Worker实例持有的指标接收缓冲区
///
/// 处理程序通过HTTP推送数据，导出步骤读取快照。每次处理前清空。
#[derive(Debug, Clone, Default)]
pub struct MetricsBuffer {
    inner: Arc<RwLock<MetricsSnapshot>>,
}

impl MetricsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 性能配置中的每个数值叶子都是一个指标名和预算
    pub async fn set_perf_config(&self, settings: Map<String, Value>) {
        let flat = flatten(&settings);
        let mut state = self.inner.write().await;
        for (name, value) in flat {
            if value.is_number() {
                state.metric_names.push(name.clone());
                state.budgets.insert(name, value);
            }
        }
        state.settings = settings;
        debug!("收到性能配置，指标数 {}", state.metric_names.len());
    }

    pub async fn set_metadata_names(&self, names: Vec<String>) {
        self.inner.write().await.metadata_names = names;
    }

    /// 每个元素是 `{书签名: 时间戳}`，同时从 `METADATA:<key>:...` 书签中得到元数据名
    pub async fn set_bookmarks(&self, bookmarks: Vec<BTreeMap<String, f64>>) {
        let bookmarks: Vec<Bookmark> = bookmarks
            .into_iter()
            .flat_map(|row| row.into_iter())
            .map(|(name, timestamp)| Bookmark::new(name, timestamp))
            .collect();

        let mut metadata_names: Vec<String> = Vec::new();
        for bookmark in &bookmarks {
            let Some(rest) = bookmark.name.strip_prefix(METADATA_PREFIX) else {
                continue;
            };
            let Some(key) = rest.split(METADATA_DELIMITER).nth(1) else {
                continue;
            };
            if !metadata_names.iter().any(|name| name == key) {
                metadata_names.push(key.to_string());
            }
        }

        let mut state = self.inner.write().await;
        state.metadata_names = metadata_names;
        state.bookmarks = bookmarks;
    }

    pub async fn set_header(&self, header: MetricsHeader) {
        self.inner.write().await.header_count = header.metric_frames_count;
    }

    pub async fn add_frames(&self, frames: Vec<Value>) {
        let frames: Vec<Frame> = frames.into_iter().map(Frame::from_raw).collect();
        self.inner.write().await.frames.extend(frames);
    }

    pub async fn flush(&self) {
        *self.inner.write().await = MetricsSnapshot::default();
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_flatten_strips_excluded_segments() {
        let flat = flatten(&object(json!({
            "FrameStart": 10.0,
            "Game_Children": { "Tick_Budgets": { "Ms": 4.5 } },
            "Memory": { "Used_Value": 128 }
        })));

        assert_eq!(flat["FrameStart"], json!(10.0));
        assert_eq!(flat["Game_Tick_Ms"], json!(4.5));
        assert_eq!(flat["Memory_Used"], json!(128));
        assert_eq!(flat.len(), 3);
    }

    #[tokio::test]
    async fn test_availability() {
        let buffer = MetricsBuffer::new();
        assert!(!buffer.snapshot().await.is_available());

        buffer
            .set_perf_config(object(json!({
                "Game_Children": { "Tick_Budgets": 16.6 },
                "Label": "not a metric"
            })))
            .await;
        buffer.set_header(MetricsHeader { metric_frames_count: 2 }).await;
        buffer
            .add_frames(vec![json!({"FrameStart": 0.0, "FrameEnd": 16.0})])
            .await;
        assert!(!buffer.snapshot().await.is_available());

        buffer
            .add_frames(vec![json!({"FrameStart": 16.0, "FrameEnd": 33.0})])
            .await;
        let snapshot = buffer.snapshot().await;
        assert!(snapshot.is_available());
        assert_eq!(snapshot.metric_names, vec!["Game_Tick".to_string()]);
        assert_eq!(snapshot.budgets["Game_Tick"], json!(16.6));

        buffer.flush().await;
        let snapshot = buffer.snapshot().await;
        assert!(!snapshot.is_available());
        assert!(snapshot.frames.is_empty());
        assert!(snapshot.settings.is_empty());
    }

    #[tokio::test]
    async fn test_bookmarks_derive_metadata_names() {
        let buffer = MetricsBuffer::new();
        buffer
            .set_bookmarks(vec![
                BTreeMap::from([("METADATA:version:1.2.3.4-abc".to_string(), 1.0)]),
                BTreeMap::from([("METADATA:map:arena".to_string(), 2.0)]),
                BTreeMap::from([("METADATA:map:other".to_string(), 3.0)]),
                BTreeMap::from([("LoadingDone".to_string(), 4.0)]),
            ])
            .await;

        let snapshot = buffer.snapshot().await;
        assert_eq!(snapshot.bookmarks.len(), 4);
        assert_eq!(snapshot.bookmarks[3], Bookmark::new("LoadingDone", 4.0));
        assert_eq!(
            snapshot.metadata_names,
            vec!["version".to_string(), "map".to_string()]
        );
    }

    #[test]
    fn test_frame_from_raw() {
        let frame = Frame::from_raw(json!({
            "FrameStart": 5.0,
            "Render": { "Draw_Value": 3 }
        }));
        assert_eq!(frame.frame_start, Some(5.0));
        assert_eq!(frame.frame_end, None);
        assert_eq!(frame.data["Render_Draw"], json!(3));
        assert_eq!(frame.raw["FrameStart"], json!(5.0));
    }
}
