//! Redis pub/sub bridge for the real-time hub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis;
use bb8_redis::redis::AsyncCommands;
use futures_util::StreamExt;
use tracing::{info, warn};

use crate::realtime::{FanoutChannel, RealtimeHub, SubscriberLifecycle, SYNC_EVENT_CHANNEL};

use super::RedisPool;

/// Publisher half of the distributed fan-out, backed by the shared pool.
#[derive(Clone)]
pub struct RedisFanoutChannel {
    pool: RedisPool,
}

impl RedisFanoutChannel {
    /// Wrap the shared pool.
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FanoutChannel for RedisFanoutChannel {
    async fn publish(&self, payload: &str) -> Result<(), String> {
        let mut conn = self.pool.get().await.map_err(|err| err.to_string())?;
        let _receivers: i64 = conn
            .publish(SYNC_EVENT_CHANNEL, payload)
            .await
            .map_err(|err: redis::RedisError| err.to_string())?;
        Ok(())
    }
}

/// Initial reconnect delay for the subscriber bridge.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Reconnect delay ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Spawn the long-lived subscriber task.
///
/// One connection per instance subscribes to the shared channel and feeds
/// received events into the hub's local plane. Connection failures degrade
/// the hub and retry with doubling backoff; a session that reached the
/// subscribed state resets the backoff.
pub fn spawn_subscriber_bridge(url: String, hub: Arc<RealtimeHub>) {
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match run_subscriber_session(&url, &hub).await {
                SessionEnd::StreamClosed => {
                    hub.subscriber_event(SubscriberLifecycle::End);
                    backoff = INITIAL_BACKOFF;
                }
                SessionEnd::ConnectFailed(message) => {
                    hub.subscriber_event(SubscriberLifecycle::ConnectFailed(message));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
            hub.subscriber_event(SubscriberLifecycle::Reconnecting);
            tokio::time::sleep(backoff).await;
        }
    });
}

enum SessionEnd {
    /// The message stream terminated after a successful subscribe.
    StreamClosed,
    /// The connection or subscribe call failed.
    ConnectFailed(String),
}

async fn run_subscriber_session(url: &str, hub: &RealtimeHub) -> SessionEnd {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(err) => return SessionEnd::ConnectFailed(err.to_string()),
    };
    let mut pubsub = match client.get_async_pubsub().await {
        Ok(pubsub) => pubsub,
        Err(err) => return SessionEnd::ConnectFailed(err.to_string()),
    };
    if let Err(err) = pubsub.subscribe(SYNC_EVENT_CHANNEL).await {
        return SessionEnd::ConnectFailed(err.to_string());
    }

    hub.subscriber_event(SubscriberLifecycle::Ready);
    info!(channel = SYNC_EVENT_CHANNEL, "sync event subscriber connected");

    let mut stream = pubsub.on_message();
    while let Some(message) = stream.next().await {
        match message.get_payload::<String>() {
            Ok(payload) => hub.ingest_remote(&payload),
            Err(err) => warn!(error = %err, "undecodable sync event payload"),
        }
    }
    warn!("sync event subscriber stream ended");
    SessionEnd::StreamClosed
}
