pub mod manager_client;
pub mod metrics_buffer;
pub mod worker_lifecycle;

pub use manager_client::{HttpManagerClient, ManagerApi, ManagerCallError};
pub use metrics_buffer::{MetricsBuffer, MetricsHeader, MetricsSnapshot};
pub use worker_lifecycle::{WorkerLifecycle, WorkerState};
