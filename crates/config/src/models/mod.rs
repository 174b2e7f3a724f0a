pub mod app_config;
pub mod cleanup;
pub mod database;
pub mod manager_worker;
pub mod observability;

pub use app_config::*;
pub use cleanup::*;
pub use database::*;
pub use manager_worker::*;
pub use observability::*;
