//! Redis-backed `TicketReplayStore` implementation.
//!
//! Single-use enforcement rides on `SET key 1 NX PX <ttl>`: the atomic
//! set-if-not-exists result is the creation acknowledgement. Any Redis
//! failure surfaces as `Unavailable`; the ticket service decides whether to
//! fail open or closed.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis;

use crate::domain::ports::{ReplayOutcome, ReplayStoreError, TicketReplayStore};

use super::RedisPool;

const KEY_PREFIX: &str = "notesync:ticket:jti:";

/// Redis-backed implementation of the `TicketReplayStore` port.
#[derive(Clone)]
pub struct RedisTicketReplayStore {
    pool: RedisPool,
}

impl RedisTicketReplayStore {
    /// Wrap the shared pool.
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketReplayStore for RedisTicketReplayStore {
    async fn try_consume(
        &self,
        jti: &str,
        ttl: Duration,
    ) -> Result<ReplayOutcome, ReplayStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| ReplayStoreError::unavailable(err.to_string()))?;

        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let created: Option<String> = redis::cmd("SET")
            .arg(format!("{KEY_PREFIX}{jti}"))
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut *conn)
            .await
            .map_err(|err| ReplayStoreError::unavailable(err.to_string()))?;

        Ok(match created {
            Some(_) => ReplayOutcome::FirstUse,
            None => ReplayOutcome::Replayed,
        })
    }

    fn mode(&self) -> &'static str {
        "redis"
    }
}
