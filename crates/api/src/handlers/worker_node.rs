use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    response::{record, ApiResponse},
    routes::WorkerNodeState,
};

/// 当前Worker状态，Manager的 /worker/list 轮询此接口
pub async fn worker_status(State(state): State<WorkerNodeState>) -> impl IntoResponse {
    Json(state.lifecycle.state().snapshot().await)
}

/// 取消并重新启动处理循环
pub async fn reset_worker(State(state): State<WorkerNodeState>) -> ApiResult<impl IntoResponse> {
    state
        .lifecycle
        .reset()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let info = state.lifecycle.state().snapshot().await;
    Ok(ApiResponse::success_with_message(
        info,
        "处理循环已重启".to_string(),
    ))
}

pub async fn worker_ping(State(state): State<WorkerNodeState>) -> impl IntoResponse {
    record(json!({
        "status": "ok",
        "running": state.lifecycle.is_running().await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
