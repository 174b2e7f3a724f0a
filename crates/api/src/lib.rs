//! # TraceQueue API
//!
//! Manager和Worker的HTTP接口，基于Axum。
//!
//! ## Manager
//! - `PUT /trace/queued/put?trace_name=` 入队
//! - `GET /trace/queued/acquire` 获取租约，队列为空时返回404
//! - `PUT /trace/ready/put`、`PUT /trace/queued/mark_poisoned`、
//!   `PUT /trace/queued/release_from_worker` 上报处理结果
//! - `GET /trace/get_status?trace_name=` 查询状态
//! - `GET /trace/{queued,in_progress,ready,poisoned}/list` 列表
//! - `GET /worker/list`、`GET /ping`、`GET /metrics`
//!
//! ## Worker
//! - `GET /worker/status`、`GET /worker/reset`、`GET /ping`
//! - `POST /performance_metrics/...` 接收处理程序推送的指标
//!
//! Worker协议接口直接返回记录JSON，错误统一由 [`error::ApiError`] 转换为JSON错误体。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_manager_routes, create_worker_routes, ManagerState, WorkerNodeState};

/// 创建Manager应用
pub fn create_manager_app(state: ManagerState) -> Router {
    create_manager_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(cors_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}

/// 创建Worker应用
pub fn create_worker_app(state: WorkerNodeState) -> Router {
    create_worker_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
