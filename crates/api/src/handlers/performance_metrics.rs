//! 处理程序推送指标的接收端

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{Map, Value};
use tracequeue_worker::MetricsHeader;

use crate::routes::WorkerNodeState;

pub async fn set_perf_config(
    State(state): State<WorkerNodeState>,
    Json(settings): Json<Map<String, Value>>,
) -> StatusCode {
    state.buffer.set_perf_config(settings).await;
    StatusCode::ACCEPTED
}

pub async fn set_metadata_names(
    State(state): State<WorkerNodeState>,
    Json(names): Json<Vec<String>>,
) -> StatusCode {
    state.buffer.set_metadata_names(names).await;
    StatusCode::ACCEPTED
}

pub async fn set_bookmarks(
    State(state): State<WorkerNodeState>,
    Json(bookmarks): Json<Vec<BTreeMap<String, f64>>>,
) -> StatusCode {
    state.buffer.set_bookmarks(bookmarks).await;
    StatusCode::ACCEPTED
}

pub async fn set_header(
    State(state): State<WorkerNodeState>,
    Json(header): Json<MetricsHeader>,
) -> StatusCode {
    state.buffer.set_header(header).await;
    StatusCode::ACCEPTED
}

pub async fn add_frames(
    State(state): State<WorkerNodeState>,
    Json(frames): Json<Vec<Value>>,
) -> StatusCode {
    state.buffer.add_frames(frames).await;
    StatusCode::ACCEPTED
}
