//! Persistence adapters: Diesel/PostgreSQL plus the in-memory engine.

mod diesel_bootstrap_repository;
mod diesel_change_log;
mod diesel_device_repository;
mod diesel_idempotency_store;
mod diesel_user_directory;
mod memory;
mod models;
mod pool;
pub(crate) mod schema;

pub use diesel_bootstrap_repository::DieselBootstrapRepository;
pub use diesel_change_log::DieselChangeLog;
pub use diesel_device_repository::DieselDeviceRepository;
pub use diesel_idempotency_store::DieselIdempotencyStore;
pub use diesel_user_directory::DieselUserDirectory;
pub use memory::MemoryStore;
pub use pool::{DbPool, PoolConfig, PoolError};
