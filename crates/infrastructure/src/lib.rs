pub mod broker;
pub mod cleanup_service;
pub mod database;
pub mod observability;

pub use broker::{finish, QueueOccupancy, StoreTransaction, TraceBroker, TxOutcome};
pub use cleanup_service::{CleanupService, CleanupStats, RetentionPolicy, RetentionScenario};
pub use database::{
    trace_store, CollectionSpec, DatabaseManager, DatabaseType, Leases, Poisoned, Queued, Ready,
};
pub use observability::{install_prometheus_recorder, MetricsCollector};
