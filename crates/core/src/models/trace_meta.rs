use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const METADATA_PREFIX: &str = "METADATA";
pub const METADATA_DELIMITER: &str = ":";
pub const DEFAULT_INDEX_PREFIX: &str = "prf";

const IS_SERVER_KEY: &str = "is_server";
const UNKNOWN_VALUE: &str = "unknown";
const INVALID_VALUE: &str = "invalid";
const DEV_VALUE: &str = "dev";
const DEV_VERSION: &str = "0.0.0.dev";
const DEFAULT_VERSION: &str = "0.0.0";
const MAX_INDEX_NAME_LEN: usize = 255;

/// 可以通过 METADATA 书签直接设置的字段
const KNOWN_FIELDS: [&str; 14] = [
    "es_index",
    "branch",
    "type",
    "commit",
    "short_commit",
    "version",
    "branch_build",
    "title",
    "build",
    "parameter",
    "workstation",
    "test_start",
    "test_name",
    "test_id",
];

static VERSION_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+).([0-9]+).([0-9]+).([0-9]+)(-([0-9]+))?(-(.+))?-(.+)").ok()
});

/// Trace中带时间戳的书签
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: f64,
}

impl Bookmark {
    pub fn new(name: impl Into<String>, timestamp: f64) -> Self {
        Self {
            name: name.into(),
            timestamp,
        }
    }

    /// `METADATA:<key>:<value>` 形式的书签拆分为 (key, value)
    pub fn metadata(&self) -> Option<(&str, Option<&str>)> {
        let rest = self.name.strip_prefix(METADATA_PREFIX)?;
        let rest = rest.strip_prefix(METADATA_DELIMITER)?;
        match rest.split_once(METADATA_DELIMITER) {
            Some((key, value)) => Some((key, Some(value))),
            None => Some((rest, None)),
        }
    }

    /// 用于匹配归一化书签的名字：元数据书签取key，否则取完整名字
    pub fn key(&self) -> &str {
        self.metadata().map(|(key, _)| key).unwrap_or(&self.name)
    }
}

/// 元数据提取时的覆盖项
#[derive(Debug, Clone, Default)]
pub struct MetaOptions {
    pub index_prefix: Option<String>,
    pub build: Option<String>,
    pub title: Option<String>,
    pub workstation: Option<String>,
}

/// 从书签和Trace名中提取的元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceMeta {
    pub es_index: Option<String>,
    pub branch: Option<String>,
    #[serde(rename = "type")]
    pub trace_type: Option<String>,
    pub commit: Option<String>,
    pub short_commit: Option<String>,
    pub version: Option<String>,
    pub branch_build: Option<String>,
    pub title: Option<String>,
    pub build: Option<String>,
    pub parameter: Option<String>,
    pub workstation: Option<String>,
    pub test_start: Option<String>,
    pub test_name: Option<String>,
    pub test_id: Option<String>,
    #[serde(default)]
    pub started_timestamp: f64,
    #[serde(default)]
    pub processed_timestamp: f64,
    /// 自定义元数据
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl TraceMeta {
    /// 根据书签重新计算元数据，保留 started_timestamp
    pub fn update(
        &mut self,
        bookmarks: &[Bookmark],
        trace_name: &str,
        metadata_names: &[String],
        options: &MetaOptions,
    ) {
        let mut values = bookmarks_metadata(bookmarks, metadata_names);
        if !values.contains_key("version") {
            warn!("No trace version found! Trace seem to be corrupt or incomplete: {trace_name}");
            values.insert("version".to_string(), DEFAULT_VERSION.to_string());
            values.insert("build".to_string(), INVALID_VALUE.to_string());
            values.insert("branch_build".to_string(), "0".to_string());
            values.insert("branch".to_string(), INVALID_VALUE.to_string());
            values.insert("short_commit".to_string(), String::new());
        }

        let started_timestamp = self.started_timestamp;
        *self = TraceMeta::default();
        for (key, value) in values {
            self.set_field(key, value);
        }

        let (test_start, workstation) = parse_trace_name(trace_name);
        self.test_start = Some(test_start);
        if self.test_id.is_none() {
            self.test_id = Some(format!("noid_{trace_name}"));
        }
        if self.test_name.is_none() {
            self.test_name = Some(UNKNOWN_VALUE.to_string());
        }
        if self.parameter.is_none() {
            self.parameter = self.version.clone();
        }
        if let Some(build) = &options.build {
            self.build = Some(build.clone());
        }

        self.title = Some(match &options.title {
            Some(title) => title.clone(),
            None => self.default_title(),
        });

        let workstation = options
            .workstation
            .clone()
            .or_else(|| self.workstation.clone())
            .filter(|w| !w.is_empty())
            .unwrap_or(workstation);
        self.workstation = Some(workstation.to_lowercase());

        self.es_index = Some(self.index_name(options.index_prefix.as_deref()));
        self.started_timestamp = started_timestamp;
    }

    fn set_field(&mut self, key: String, value: String) {
        let slot = match key.as_str() {
            "es_index" => &mut self.es_index,
            "branch" => &mut self.branch,
            "type" => &mut self.trace_type,
            "commit" => &mut self.commit,
            "short_commit" => &mut self.short_commit,
            "version" => &mut self.version,
            "branch_build" => &mut self.branch_build,
            "title" => &mut self.title,
            "build" => &mut self.build,
            "parameter" => &mut self.parameter,
            "workstation" => &mut self.workstation,
            "test_start" => &mut self.test_start,
            "test_name" => &mut self.test_name,
            "test_id" => &mut self.test_id,
            _ => {
                self.extra.insert(key, value);
                return;
            }
        };
        *slot = Some(value);
    }

    fn default_title(&self) -> String {
        let mut title = format!(
            "{}.{}",
            self.version.as_deref().unwrap_or(DEFAULT_VERSION),
            self.build.as_deref().unwrap_or_default()
        );
        if let Some(branch) = self.branch.as_deref().filter(|b| !b.is_empty()) {
            title.push('-');
            title.push_str(branch);
        }
        if let Some(commit) = self.short_commit.as_deref().filter(|c| !c.is_empty()) {
            title.push('-');
            title.push_str(commit);
        }
        title
    }

    /// `{prefix}-{major.minor}[-{branch}]`，最长255个字符
    pub fn index_name(&self, prefix: Option<&str>) -> String {
        let prefix = prefix
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_INDEX_PREFIX);
        let version = self.version.as_deref().unwrap_or(DEFAULT_VERSION);
        let major_minor: Vec<&str> = version.split('.').take(2).collect();

        let mut name = format!("{prefix}-{}", major_minor.join("."));
        if let Some(branch) = self.branch.as_deref().filter(|b| !b.is_empty()) {
            name.push('-');
            name.push_str(branch);
        }
        name.chars().take(MAX_INDEX_NAME_LEN).collect()
    }
}

/// 收集 METADATA 书签中允许的键值
pub fn bookmarks_metadata(
    bookmarks: &[Bookmark],
    metadata_names: &[String],
) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();

    for bookmark in bookmarks {
        let Some((key, Some(value))) = bookmark.metadata() else {
            continue;
        };
        let allowed = KNOWN_FIELDS.contains(&key)
            || key == IS_SERVER_KEY
            || metadata_names.iter().any(|name| name == key);
        if !allowed {
            continue;
        }

        if key == IS_SERVER_KEY {
            let is_server = value.trim().parse::<i64>().map(|v| v != 0).unwrap_or(false);
            let trace_type = if is_server { "server" } else { "client" };
            result.insert("type".to_string(), trace_type.to_string());
            continue;
        }

        if key == "version" {
            if value == DEV_VERSION {
                result.insert("version".to_string(), DEFAULT_VERSION.to_string());
                result.insert("build".to_string(), DEV_VALUE.to_string());
                result.insert("branch_build".to_string(), "0".to_string());
                result.insert("branch".to_string(), DEV_VALUE.to_string());
                result.insert("short_commit".to_string(), String::new());
                continue;
            }
            if let Some(parsed) = parse_version(value) {
                result.extend(parsed);
            }
            continue;
        }

        result.insert(key.to_string(), value.to_string());
    }

    result
}

/// 解析 `1.2.3.4[-branch_build][-branch]-commit` 形式的版本
fn parse_version(value: &str) -> Option<Vec<(String, String)>> {
    let pattern = VERSION_PATTERN.as_ref()?;
    let value = value.to_lowercase();
    let caps = pattern.captures(&value)?;
    let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string());

    Some(vec![
        (
            "version".to_string(),
            format!("{}.{}.{}", group(1)?, group(2)?, group(3)?),
        ),
        ("build".to_string(), group(4)?),
        (
            "branch_build".to_string(),
            group(6).unwrap_or_else(|| "0".to_string()),
        ),
        ("branch".to_string(), group(8).unwrap_or_default()),
        ("short_commit".to_string(), group(9)?),
    ])
}

/// `date_time_host` → (`date_time`, `host`)
pub fn parse_trace_name(trace_name: &str) -> (String, String) {
    let segments: Vec<&str> = trace_name.split('_').collect();
    if let [date, time, host] = segments.as_slice() {
        return (format!("{date}_{time}"), host.to_string());
    }
    (
        Utc::now().format("approx_%Y%m%d_%H%M%S").to_string(),
        UNKNOWN_VALUE.to_string(),
    )
}

/// 按归一化书签 [start, end?] 计算时间窗口
pub fn normalization_window(
    bookmark_names: &[String],
    bookmarks: &[Bookmark],
) -> (Option<f64>, Option<f64>) {
    let Some(start_name) = bookmark_names.first() else {
        return (None, None);
    };
    let end_name = bookmark_names.get(1);

    let mut start = None;
    for bookmark in bookmarks {
        let key = bookmark.key();
        if key == start_name {
            start = Some(bookmark.timestamp);
        } else if start.is_some() && end_name.is_some_and(|end| end == key) {
            // 只接受出现在起始书签之后的结束书签
            return (start, Some(bookmark.timestamp));
        }
    }
    (start, None)
}
