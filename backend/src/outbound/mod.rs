//! Outbound adapters: persistence, Redis, identity provider, metrics.

pub mod identity;
pub mod metrics;
pub mod persistence;
pub mod redis;
