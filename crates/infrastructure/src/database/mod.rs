pub mod manager;
pub mod trace_store;

pub use manager::{DatabaseManager, DatabaseType};
pub use trace_store::{CollectionSpec, Leases, Poisoned, Queued, Ready};
