use axum::{extract::State, response::IntoResponse};

use crate::{error::ApiResult, response::record, routes::ManagerState};

/// 轮询已登记的Worker并返回排序后的状态列表
pub async fn list_workers(State(state): State<ManagerState>) -> ApiResult<impl IntoResponse> {
    let workers = state.workers.list_workers().await;
    state.collector.record_workers(&workers);
    Ok(record(workers))
}
