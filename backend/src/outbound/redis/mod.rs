//! Redis adapters: distributed sync fan-out and the ticket replay store.
//!
//! One bb8 pool serves publishers and the replay store; the pub/sub
//! subscriber needs its own long-lived connection (Redis connections in
//! subscribe mode cannot multiplex commands) and lives in the bridge task.

mod pubsub;
mod replay_store;

pub use pubsub::{spawn_subscriber_bridge, RedisFanoutChannel};
pub use replay_store::RedisTicketReplayStore;

use bb8_redis::bb8::Pool;
use bb8_redis::RedisConnectionManager;

/// Shared Redis connection pool.
pub type RedisPool = Pool<RedisConnectionManager>;

/// Build the shared Redis pool.
///
/// Construction succeeds even while Redis is down (connections are opened
/// lazily); actual failures surface per call and feed degradation state.
pub async fn connect_pool(url: &str) -> Result<RedisPool, String> {
    let manager = RedisConnectionManager::new(url).map_err(|err| err.to_string())?;
    Pool::builder()
        .max_size(8)
        .build(manager)
        .await
        .map_err(|err| err.to_string())
}

/// Cheap connectivity probe for readiness checks.
pub async fn ping(pool: &RedisPool) -> Result<(), String> {
    let mut conn = pool.get().await.map_err(|err| err.to_string())?;
    let _pong: String = bb8_redis::redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|err| err.to_string())?;
    Ok(())
}

/// Readiness probe wrapper for the shared pool.
#[derive(Clone)]
pub struct RedisPing(pub RedisPool);

#[async_trait::async_trait]
impl crate::domain::ports::DependencyPing for RedisPing {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), String> {
        ping(&self.0).await
    }
}
