use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracequeue_config::ExportConfig;
use tracing::{debug, info, warn};

use crate::export::{DOC_TYPE_KEY, DOC_TYPE_METRIC, TIME_FIELD};

/// 默认的索引字段数上限
pub const DEFAULT_FIELDS_LIMIT: u32 = 2000;
const BULK_CHUNK_SIZE: usize = 500;
const KEYWORD_FIELDS: [&str; 8] = [
    "test_name",
    "test_id",
    "build",
    "parameter",
    "workstation",
    "test_start",
    "title",
    "type",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("没有配置指标索引服务地址")]
    NoHosts,

    /// 连接失败或服务暂不可用
    #[error("指标索引服务不可达: {0}")]
    Unreachable(String),

    /// 服务拒绝了数据
    #[error("指标索引服务拒绝写入: {0}")]
    Rejected(String),
}

/// 一次导出的全部内容
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportBatch {
    pub index: String,
    pub metric_names: Vec<String>,
    pub metadata_names: Vec<String>,
    pub test_id: String,
    pub workstation: String,
    pub test_start: String,
    pub documents: Vec<Value>,
}

/// 指标持久化能力
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// 写入文档，返回写入数量
    async fn export(&self, hosts: &[String], batch: &ExportBatch) -> Result<usize, SinkError>;
}

fn connection_failed(err: reqwest::Error) -> SinkError {
    SinkError::Unreachable(err.to_string())
}

/// 基于Elasticsearch REST接口的实现
pub struct ElasticsearchSink {
    client: reqwest::Client,
    same_index: bool,
    mapping_limit: u32,
}

impl ElasticsearchSink {
    pub fn new(config: &ExportConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            same_index: config.same_index,
            mapping_limit: config.mapping_limit,
        }
    }

    fn fields_limit(&self) -> u32 {
        self.mapping_limit.max(DEFAULT_FIELDS_LIMIT)
    }

    fn mapping(batch: &ExportBatch) -> Value {
        let mut properties = Map::new();
        for field in KEYWORD_FIELDS {
            properties.insert(
                field.to_string(),
                json!({ "type": "keyword", "null_value": "null" }),
            );
        }
        properties.insert(
            DOC_TYPE_KEY.to_string(),
            json!({ "type": "keyword", "null_value": DOC_TYPE_METRIC }),
        );
        properties.insert(
            TIME_FIELD.to_string(),
            json!({ "type": "date", "format": "HH:mm:ss.SSS" }),
        );
        for name in &batch.metric_names {
            properties
                .entry(name.clone())
                .or_insert_with(|| json!({ "type": "float" }));
        }
        for name in &batch.metadata_names {
            properties
                .entry(name.clone())
                .or_insert_with(|| json!({ "type": "keyword", "null_value": "null" }));
        }
        json!({ "properties": properties })
    }

    async fn index_exists(&self, host: &str, index: &str) -> Result<bool, SinkError> {
        let response = self
            .client
            .head(format!("{host}/{index}"))
            .send()
            .await
            .map_err(connection_failed)?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(SinkError::Unreachable(format!(
                "查询索引 {index} 返回 HTTP {status}"
            ))),
        }
    }

    async fn send_checked(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value, SinkError> {
        let response = request.send().await.map_err(connection_failed)?;
        let status = response.status();
        let body = response.text().await.map_err(connection_failed)?;
        if !status.is_success() {
            return Err(SinkError::Unreachable(format!("{what}: HTTP {status} {body}")));
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::Null))
    }

    async fn create_index(&self, host: &str, batch: &ExportBatch) -> Result<(), SinkError> {
        let body = json!({
            "settings": {
                "index": {
                    "number_of_shards": 1,
                    "number_of_replicas": 0,
                    "mapping": { "total_fields": { "limit": self.fields_limit() } }
                }
            },
            "mappings": Self::mapping(batch),
        });
        self.send_checked(
            self.client.put(format!("{host}/{}", batch.index)).json(&body),
            "创建索引",
        )
        .await?;
        Ok(())
    }

    /// 只会提高字段数上限
    async fn raise_fields_limit(&self, host: &str, index: &str) -> Result<(), SinkError> {
        let settings = self
            .send_checked(
                self.client.get(format!("{host}/{index}/_settings")),
                "读取索引设置",
            )
            .await?;
        let current = settings
            .get(index)
            .and_then(|v| v.pointer("/settings/index/mapping/total_fields/limit"))
            .and_then(|v| match v {
                Value::String(s) => s.parse::<u32>().ok(),
                other => other.as_u64().map(|n| n as u32),
            })
            .unwrap_or(DEFAULT_FIELDS_LIMIT);
        let limit = current.max(self.mapping_limit);

        self.send_checked(
            self.client
                .put(format!("{host}/{index}/_settings"))
                .json(&json!({ "index": { "mapping": { "total_fields": { "limit": limit } } } })),
            "更新索引设置",
        )
        .await?;
        Ok(())
    }

    async fn build_index(&self, host: &str, batch: &ExportBatch) -> Result<(), SinkError> {
        info!("构建索引 {}", batch.index);
        let exists = self.index_exists(host, &batch.index).await?;
        if exists && self.same_index {
            info!("索引已存在，复用: {}", batch.index);
            if self.mapping_limit > 0 {
                self.raise_fields_limit(host, &batch.index).await?;
            }
            return Ok(());
        }
        if exists {
            info!("索引已存在，重建: {}", batch.index);
            let response = self
                .client
                .delete(format!("{host}/{}", batch.index))
                .send()
                .await
                .map_err(connection_failed)?;
            debug!("删除索引返回 HTTP {}", response.status());
        }
        self.create_index(host, batch).await
    }

    /// 删除同一次测试之前导出的文档，失败只记录日志
    async fn delete_previous(&self, host: &str, batch: &ExportBatch) {
        let query = json!({
            "query": {
                "bool": {
                    "must": [
                        { "match": { "test_id": batch.test_id } },
                        { "match": { "workstation": batch.workstation } },
                        { "match": { "test_start": batch.test_start } },
                    ]
                }
            }
        });
        let request = self
            .client
            .post(format!("{host}/{}/_delete_by_query?conflicts=proceed", batch.index))
            .json(&query);
        match self.send_checked(request, "删除旧文档").await {
            Ok(response) => {
                let failures = response
                    .get("failures")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                if failures > 0 {
                    warn!("删除旧文档时有 {} 个失败", failures);
                }
            }
            Err(e) => warn!("{}", e),
        }
    }

    async fn bulk(&self, host: &str, batch: &ExportBatch) -> Result<usize, SinkError> {
        info!("写入 {} 个文档到 {}", batch.documents.len(), batch.index);
        let action = json!({ "index": { "_index": batch.index } }).to_string();

        for chunk in batch.documents.chunks(BULK_CHUNK_SIZE) {
            let mut body = String::new();
            for document in chunk {
                body.push_str(&action);
                body.push('\n');
                body.push_str(&document.to_string());
                body.push('\n');
            }

            let response = self
                .client
                .post(format!("{host}/_bulk"))
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body)
                .send()
                .await
                .map_err(connection_failed)?;
            let status = response.status();
            let text = response.text().await.map_err(connection_failed)?;
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(SinkError::Unreachable(format!("批量写入: HTTP {status}")));
            }
            if !status.is_success() {
                return Err(SinkError::Rejected(format!("批量写入: HTTP {status} {text}")));
            }

            let response: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            if response.get("errors").and_then(Value::as_bool) == Some(true) {
                return Err(SinkError::Rejected(bulk_error_reason(&response)));
            }
        }
        Ok(batch.documents.len())
    }

    async fn export_to(&self, host: &str, batch: &ExportBatch) -> Result<usize, SinkError> {
        self.build_index(host, batch).await?;
        self.delete_previous(host, batch).await;
        self.bulk(host, batch).await
    }
}

/// 取第一条失败记录的原因
fn bulk_error_reason(response: &Value) -> String {
    response
        .get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("index").and_then(|index| index.get("error")))
        .map(|error| {
            error
                .pointer("/caused_by/reason")
                .or_else(|| error.get("reason"))
                .and_then(Value::as_str)
                .unwrap_or("Bulk index error")
                .to_string()
        })
        .next()
        .unwrap_or_else(|| "Bulk index error".to_string())
}

#[async_trait]
impl MetricsSink for ElasticsearchSink {
    async fn export(&self, hosts: &[String], batch: &ExportBatch) -> Result<usize, SinkError> {
        if hosts.is_empty() {
            return Err(SinkError::NoHosts);
        }

        let mut last_error = String::new();
        for host in hosts {
            match self.export_to(host.trim_end_matches('/'), batch).await {
                Err(SinkError::Unreachable(reason)) => {
                    warn!("索引服务 {} 不可用: {}", host, reason);
                    last_error = reason;
                }
                other => return other,
            }
        }
        Err(SinkError::Unreachable(format!(
            "无法连接任何索引服务 {hosts:?}: {last_error}"
        )))
    }
}
