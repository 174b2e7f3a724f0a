pub mod health;
pub mod performance_metrics;
pub mod traces;
pub mod worker_node;
pub mod workers;
