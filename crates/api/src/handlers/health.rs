use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::{error::ApiResult, routes::ManagerState};

pub async fn ping() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus文本格式，抓取时刷新队列占用
pub async fn metrics(State(state): State<ManagerState>) -> ApiResult<impl IntoResponse> {
    let occupancy = state.traces.occupancy().await?;
    state.collector.record_occupancy(&occupancy);

    let body = state
        .prometheus
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
