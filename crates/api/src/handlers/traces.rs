use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracequeue_core::{ProcessingReport, TraceStatus, WorkerConfiguration};
use tracing::debug;

use crate::{
    error::{ApiError, ApiResult},
    response::{accepted, record, ApiResponse},
    routes::ManagerState,
};

#[derive(Debug, Deserialize)]
pub struct TraceNameQuery {
    pub trace_name: Option<String>,
}

impl TraceNameQuery {
    fn required(self) -> ApiResult<String> {
        self.trace_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ApiError::BadRequest("缺少参数 trace_name".to_string()))
    }
}

/// Worker获取租约时的请求体
#[derive(Debug, Deserialize)]
pub struct AcquireRequest {
    pub url: String,
}

/// 入队，请求体可选地携带 worker_configuration
pub async fn enqueue_trace(
    State(state): State<ManagerState>,
    Query(query): Query<TraceNameQuery>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let trace_name = query.required()?;
    let worker_configuration = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(
            serde_json::from_slice::<WorkerConfiguration>(&body)
                .map_err(|e| ApiError::BadRequest(format!("worker_configuration格式错误: {e}")))?,
        )
    };

    let queued = state
        .traces
        .enqueue(&trace_name, worker_configuration)
        .await?;
    Ok(record(queued))
}

/// 获取租约，队列为空时返回404
pub async fn acquire_trace(
    State(state): State<ManagerState>,
    Json(request): Json<AcquireRequest>,
) -> ApiResult<impl IntoResponse> {
    state.workers.register(&request.url).await;
    match state.traces.acquire_lease(&request.url).await? {
        Some(trace) => Ok(record(trace).into_response()),
        None => {
            debug!("{} 请求租约，队列为空", request.url);
            Ok((
                StatusCode::NOT_FOUND,
                Json(json!({ "message": "no queued traces" })),
            )
                .into_response())
        }
    }
}

pub async fn report_ready(
    State(state): State<ManagerState>,
    Json(report): Json<ProcessingReport>,
) -> ApiResult<impl IntoResponse> {
    state.workers.register(&report.worker.url).await;
    let outcome = state.traces.report_ready(report).await?;
    Ok(accepted(json!({ "outcome": outcome })))
}

pub async fn mark_poisoned(
    State(state): State<ManagerState>,
    Json(report): Json<ProcessingReport>,
) -> ApiResult<impl IntoResponse> {
    state.workers.register(&report.worker.url).await;
    let outcome = state.traces.mark_poisoned(report).await?;
    Ok(accepted(json!({ "outcome": outcome })))
}

pub async fn release_from_worker(
    State(state): State<ManagerState>,
    Json(report): Json<ProcessingReport>,
) -> ApiResult<impl IntoResponse> {
    state.workers.register(&report.worker.url).await;
    let outcome = state.traces.release_from_worker(report).await?;
    Ok(accepted(json!({ "outcome": outcome })))
}

/// 查询状态，未知的Trace返回404
pub async fn get_status(
    State(state): State<ManagerState>,
    Query(query): Query<TraceNameQuery>,
) -> ApiResult<impl IntoResponse> {
    let trace_name = query.required()?;
    let status = state.traces.get_status(&trace_name).await?;
    let code = if status == TraceStatus::NotFound {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    Ok((
        code,
        Json(json!({ "trace_name": trace_name, "status": status })),
    ))
}

pub async fn list_queued(State(state): State<ManagerState>) -> ApiResult<impl IntoResponse> {
    Ok(record(state.traces.list_queued().await?))
}

pub async fn list_in_progress(State(state): State<ManagerState>) -> ApiResult<impl IntoResponse> {
    Ok(record(state.traces.list_in_progress().await?))
}

pub async fn list_ready(State(state): State<ManagerState>) -> ApiResult<impl IntoResponse> {
    Ok(record(state.traces.list_ready().await?))
}

pub async fn list_poisoned(State(state): State<ManagerState>) -> ApiResult<impl IntoResponse> {
    Ok(record(state.traces.list_poisoned().await?))
}

/// 从队列移除，Trace不在队列中时返回404
pub async fn drop_queued(
    State(state): State<ManagerState>,
    Query(query): Query<TraceNameQuery>,
) -> ApiResult<impl IntoResponse> {
    let trace_name = query.required()?;
    if !state.traces.drop_queued(&trace_name).await? {
        return Err(ApiError::NotFound(format!("{trace_name} 不在队列中")));
    }
    Ok(ApiResponse::success_with_message(
        trace_name,
        "已从队列移除".to_string(),
    ))
}
