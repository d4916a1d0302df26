//! Port abstraction for the stream-ticket replay store.
//!
//! Single-use enforcement needs an atomic "set if not exists" shared across
//! instances. The Redis adapter provides that; the in-memory store keeps the
//! same semantics for a single instance (development and tests).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised by replay store adapters.
    pub enum ReplayStoreError {
        /// The store could not be reached; policy decides fail-open/closed.
        Unavailable { message: String } => "replay store unavailable: {message}",
    }
}

/// Result of attempting to consume a ticket id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// This consumption created the record: the ticket is fresh.
    FirstUse,
    /// The record already existed: the ticket was replayed.
    Replayed,
}

/// Port for atomically recording consumed ticket ids.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TicketReplayStore: Send + Sync {
    /// Record `jti` with the given TTL iff absent.
    async fn try_consume(&self, jti: &str, ttl: Duration)
        -> Result<ReplayOutcome, ReplayStoreError>;

    /// Adapter descriptor surfaced by the readiness report.
    fn mode(&self) -> &'static str;
}

/// Process-local replay store with TTL semantics.
///
/// Suitable for single-instance deployments and tests; multi-instance
/// deployments need the Redis adapter for cross-instance single-use.
#[derive(Debug, Default)]
pub struct MemoryReplayStore {
    consumed: Mutex<HashMap<String, Instant>>,
}

impl MemoryReplayStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketReplayStore for MemoryReplayStore {
    async fn try_consume(
        &self,
        jti: &str,
        ttl: Duration,
    ) -> Result<ReplayOutcome, ReplayStoreError> {
        let mut consumed = self
            .consumed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        consumed.retain(|_, expires| *expires > now);
        if consumed.contains_key(jti) {
            return Ok(ReplayOutcome::Replayed);
        }
        consumed.insert(jti.to_owned(), now + ttl);
        Ok(ReplayOutcome::FirstUse)
    }

    fn mode(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_consume_wins_second_is_replay() {
        let store = MemoryReplayStore::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(
            store.try_consume("jti-1", ttl).await.expect("consume"),
            ReplayOutcome::FirstUse
        );
        assert_eq!(
            store.try_consume("jti-1", ttl).await.expect("consume"),
            ReplayOutcome::Replayed
        );
    }

    #[tokio::test]
    async fn expired_entries_free_the_id() {
        let store = MemoryReplayStore::new();
        assert_eq!(
            store
                .try_consume("jti-2", Duration::from_millis(0))
                .await
                .expect("consume"),
            ReplayOutcome::FirstUse
        );
        // TTL of zero means the record is already expired on the next call.
        assert_eq!(
            store
                .try_consume("jti-2", Duration::from_secs(60))
                .await
                .expect("consume"),
            ReplayOutcome::FirstUse
        );
    }
}
