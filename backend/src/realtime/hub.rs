//! The real-time hub: cursor announcements for live subscribers.
//!
//! Two delivery planes. The process-local plane is a `tokio::sync::broadcast`
//! channel every SSE connection on this instance subscribes to; it always
//! works. The distributed plane bridges instances over a shared pub/sub
//! channel; it can degrade, and the hub tracks when and why without ever
//! failing a publish back to the commit path.
//!
//! Published events carry the origin instance id. The subscriber bridge
//! drops self-originated events, so local subscribers see each commit
//! exactly once whether or not the distributed plane is up.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::ports::{Clock, SyncEventPublisher};
use crate::domain::UserId;

/// Fixed pub/sub channel shared by all instances.
pub const SYNC_EVENT_CHANNEL: &str = "notesync:sync-events";

/// Buffered events per local subscriber before lag drops old ones.
const LOCAL_CHANNEL_CAPACITY: usize = 256;

/// A cursor announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub user_id: UserId,
    pub cursor: i64,
    /// Event discriminator; always `"sync"` on the wire.
    #[serde(rename = "type")]
    pub kind: String,
    /// Millisecond epoch at publish time.
    pub emitted_at: i64,
    /// Instance that published the event; used to drop self-echoes.
    pub origin: Uuid,
}

/// Port for the distributed publish side of the hub.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FanoutChannel: Send + Sync {
    /// Publish a serialized event to the shared channel.
    async fn publish(&self, payload: &str) -> Result<(), String>;
}

/// Why the distributed plane is currently unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DegradedReason {
    NotInitialized,
    SubscriberConnectFailed,
    SubscriberClose,
    SubscriberEnd,
    SubscriberReconnecting,
    SubscriberError,
    PublishFailed,
}

/// Subscriber connection lifecycle notifications from the bridge task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberLifecycle {
    Ready,
    Close,
    End,
    Reconnecting,
    ConnectFailed(String),
    Error(String),
}

#[derive(Debug)]
struct HubState {
    initialized: bool,
    subscriber_ready: bool,
    publisher_ready: bool,
    degraded_reason: Option<DegradedReason>,
    degraded_since: Option<Instant>,
    degraded_transitions: u64,
    total_degraded: Duration,
    last_error: Option<String>,
}

impl HubState {
    fn local_only() -> Self {
        Self {
            initialized: true,
            subscriber_ready: false,
            publisher_ready: false,
            degraded_reason: Some(DegradedReason::NotInitialized),
            degraded_since: Some(Instant::now()),
            degraded_transitions: 1,
            total_degraded: Duration::ZERO,
            last_error: None,
        }
    }

    fn distributed() -> Self {
        Self {
            initialized: true,
            // The publisher pool exists; the subscriber bridge reports in
            // asynchronously once connected.
            subscriber_ready: false,
            publisher_ready: true,
            degraded_reason: Some(DegradedReason::NotInitialized),
            degraded_since: Some(Instant::now()),
            degraded_transitions: 1,
            total_degraded: Duration::ZERO,
            last_error: None,
        }
    }

    fn available(&self, has_publisher: bool) -> bool {
        has_publisher && self.initialized && self.subscriber_ready && self.publisher_ready
    }

    /// Recompute degradation bookkeeping after a state mutation.
    ///
    /// `cause` names the failure that triggered this settle; when `None`
    /// (recovery paths) a still-degraded hub keeps its previous reason.
    fn settle(&mut self, has_publisher: bool, cause: Option<DegradedReason>) {
        if self.available(has_publisher) {
            if let Some(started) = self.degraded_since.take() {
                self.total_degraded += started.elapsed();
            }
            self.degraded_reason = None;
        } else {
            if self.degraded_since.is_none() {
                self.degraded_since = Some(Instant::now());
                self.degraded_transitions += 1;
            }
            self.degraded_reason = cause
                .or(self.degraded_reason)
                .or(Some(DegradedReason::NotInitialized));
        }
    }
}

/// Serializable hub status for readiness and metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatusSnapshot {
    /// `distributed` or `local-fallback`.
    pub mode: &'static str,
    pub subscriber_ready: bool,
    pub publisher_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<DegradedReason>,
    /// Milliseconds in the current degradation window (0 when healthy).
    pub degraded_for_ms: u64,
    pub total_degraded_ms: u64,
    pub degraded_transitions: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Process-wide real-time hub.
pub struct RealtimeHub {
    instance_id: Uuid,
    local: broadcast::Sender<SyncEvent>,
    publisher: Option<Arc<dyn FanoutChannel>>,
    clock: Arc<dyn Clock>,
    state: Mutex<HubState>,
}

impl RealtimeHub {
    /// Local-fallback hub: no distributed channel configured.
    pub fn local_only(clock: Arc<dyn Clock>) -> Self {
        let (local, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        Self {
            instance_id: Uuid::new_v4(),
            local,
            publisher: None,
            clock,
            state: Mutex::new(HubState::local_only()),
        }
    }

    /// Hub with a distributed publisher; the subscriber bridge reports its
    /// lifecycle separately via [`Self::subscriber_event`].
    pub fn with_distributed(publisher: Arc<dyn FanoutChannel>, clock: Arc<dyn Clock>) -> Self {
        let (local, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        Self {
            instance_id: Uuid::new_v4(),
            local,
            publisher: Some(publisher),
            clock,
            state: Mutex::new(HubState::distributed()),
        }
    }

    /// This instance's origin id.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Subscribe to the local plane. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.local.subscribe()
    }

    /// Whether cross-instance fan-out is currently working.
    pub fn distributed_available(&self) -> bool {
        let state = self.lock_state();
        state.available(self.publisher.is_some())
    }

    /// Status snapshot for readiness and metrics.
    pub fn status(&self) -> HubStatusSnapshot {
        let state = self.lock_state();
        let degraded_for = state
            .degraded_since
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO);
        HubStatusSnapshot {
            mode: if state.available(self.publisher.is_some()) {
                "distributed"
            } else {
                "local-fallback"
            },
            subscriber_ready: state.subscriber_ready,
            publisher_ready: state.publisher_ready,
            degraded_reason: state.degraded_reason,
            degraded_for_ms: u64::try_from(degraded_for.as_millis()).unwrap_or(u64::MAX),
            total_degraded_ms: u64::try_from(state.total_degraded.as_millis())
                .unwrap_or(u64::MAX),
            degraded_transitions: state.degraded_transitions,
            last_error: state.last_error.clone(),
        }
    }

    /// Apply a subscriber lifecycle notification from the bridge task.
    pub fn subscriber_event(&self, event: SubscriberLifecycle) {
        let has_publisher = self.publisher.is_some();
        let mut state = self.lock_state();
        let cause = match &event {
            SubscriberLifecycle::Ready => {
                state.subscriber_ready = true;
                state.last_error = None;
                None
            }
            SubscriberLifecycle::Close => {
                state.subscriber_ready = false;
                Some(DegradedReason::SubscriberClose)
            }
            SubscriberLifecycle::End => {
                state.subscriber_ready = false;
                Some(DegradedReason::SubscriberEnd)
            }
            SubscriberLifecycle::Reconnecting => {
                state.subscriber_ready = false;
                Some(DegradedReason::SubscriberReconnecting)
            }
            SubscriberLifecycle::ConnectFailed(message) => {
                state.subscriber_ready = false;
                state.last_error = Some(message.clone());
                Some(DegradedReason::SubscriberConnectFailed)
            }
            SubscriberLifecycle::Error(message) => {
                state.subscriber_ready = false;
                state.last_error = Some(message.clone());
                Some(DegradedReason::SubscriberError)
            }
        };
        state.settle(has_publisher, cause);
    }

    /// Feed a payload received from the distributed channel into the local
    /// plane, dropping self-originated echoes.
    pub fn ingest_remote(&self, payload: &str) {
        match serde_json::from_str::<SyncEvent>(payload) {
            Ok(event) if event.origin == self.instance_id => {
                debug!("dropping self-originated sync event");
            }
            Ok(event) => {
                let _ = self.local.send(event);
            }
            Err(error) => {
                warn!(%error, "discarding malformed distributed sync event");
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn publish_distributed(&self, event: &SyncEvent) {
        let Some(publisher) = self.publisher.as_ref() else {
            return;
        };
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "sync event serialization failed");
                return;
            }
        };
        match publisher.publish(&payload).await {
            Ok(()) => {
                let mut state = self.lock_state();
                state.publisher_ready = true;
                state.settle(true, None);
            }
            Err(message) => {
                warn!(%message, "distributed sync publish failed");
                let mut state = self.lock_state();
                state.publisher_ready = false;
                state.last_error = Some(message);
                state.settle(true, Some(DegradedReason::PublishFailed));
            }
        }
    }
}

#[async_trait]
impl SyncEventPublisher for RealtimeHub {
    async fn publish_sync_event(&self, user_id: UserId, cursor: i64) {
        let event = SyncEvent {
            user_id,
            cursor,
            kind: "sync".to_owned(),
            emitted_at: self.clock.now_ms(),
            origin: self.instance_id,
        };
        // Local plane first: subscribers on this instance must see the event
        // even when the distributed channel is down. A send error only means
        // nobody is listening locally.
        let _ = self.local.send(event.clone());
        self.publish_distributed(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ManualClock, SystemClock};
    use rstest::rstest;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::at_ms(5_000))
    }

    #[rstest]
    #[tokio::test]
    async fn local_only_hub_delivers_to_both_subscribers() {
        let hub = RealtimeHub::local_only(clock());
        let mut rx_a = hub.subscribe();
        let mut rx_b = hub.subscribe();
        let user = UserId::random();

        hub.publish_sync_event(user, 3).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let event = rx.recv().await.expect("event delivered");
            assert_eq!(event.user_id, user);
            assert_eq!(event.cursor, 3);
            assert_eq!(event.kind, "sync");
            assert_eq!(event.emitted_at, 5_000);
        }
    }

    #[rstest]
    fn local_only_hub_reports_fallback_mode() {
        let hub = RealtimeHub::local_only(clock());
        let status = hub.status();
        assert_eq!(status.mode, "local-fallback");
        assert_eq!(status.degraded_reason, Some(DegradedReason::NotInitialized));
        assert!(!hub.distributed_available());
    }

    #[rstest]
    #[tokio::test]
    async fn publish_failure_degrades_without_erroring() {
        let mut channel = MockFanoutChannel::new();
        channel
            .expect_publish()
            .returning(|_| Err("connection reset".to_owned()));
        let hub = RealtimeHub::with_distributed(Arc::new(channel), clock());
        hub.subscriber_event(SubscriberLifecycle::Ready);
        assert!(hub.distributed_available());

        let mut rx = hub.subscribe();
        hub.publish_sync_event(UserId::random(), 9).await;

        // Local delivery still happened.
        assert_eq!(rx.recv().await.expect("local event").cursor, 9);
        let status = hub.status();
        assert_eq!(status.mode, "local-fallback");
        assert_eq!(status.degraded_reason, Some(DegradedReason::PublishFailed));
        assert_eq!(status.last_error.as_deref(), Some("connection reset"));
    }

    #[rstest]
    #[tokio::test]
    async fn successful_publish_recovers_publisher_state() {
        let mut channel = MockFanoutChannel::new();
        let mut fail_first = true;
        channel.expect_publish().returning(move |_| {
            if fail_first {
                fail_first = false;
                Err("transient".to_owned())
            } else {
                Ok(())
            }
        });
        let hub = RealtimeHub::with_distributed(Arc::new(channel), clock());
        hub.subscriber_event(SubscriberLifecycle::Ready);

        hub.publish_sync_event(UserId::random(), 1).await;
        assert!(!hub.distributed_available());
        hub.publish_sync_event(UserId::random(), 2).await;
        assert!(hub.distributed_available());
        assert!(hub.status().degraded_transitions >= 2);
    }

    #[rstest]
    fn subscriber_lifecycle_updates_reason() {
        let mut channel = MockFanoutChannel::new();
        channel.expect_publish().returning(|_| Ok(()));
        let hub = RealtimeHub::with_distributed(Arc::new(channel), clock());

        hub.subscriber_event(SubscriberLifecycle::Ready);
        assert!(hub.distributed_available());

        hub.subscriber_event(SubscriberLifecycle::Reconnecting);
        assert_eq!(
            hub.status().degraded_reason,
            Some(DegradedReason::SubscriberReconnecting)
        );

        hub.subscriber_event(SubscriberLifecycle::Error("socket reset".to_owned()));
        assert_eq!(
            hub.status().degraded_reason,
            Some(DegradedReason::SubscriberError)
        );
        assert_eq!(hub.status().last_error.as_deref(), Some("socket reset"));
    }

    #[rstest]
    #[tokio::test]
    async fn remote_events_are_ingested_but_self_echoes_dropped() {
        let hub = RealtimeHub::local_only(Arc::new(SystemClock));
        let mut rx = hub.subscribe();
        let user = UserId::random();

        let remote = SyncEvent {
            user_id: user,
            cursor: 4,
            kind: "sync".to_owned(),
            emitted_at: 0,
            origin: Uuid::new_v4(),
        };
        hub.ingest_remote(&serde_json::to_string(&remote).expect("serialize"));
        assert_eq!(rx.recv().await.expect("remote event").cursor, 4);

        let echo = SyncEvent {
            origin: hub.instance_id(),
            ..remote
        };
        hub.ingest_remote(&serde_json::to_string(&echo).expect("serialize"));
        assert!(rx.try_recv().is_err(), "self echo must not be re-delivered");
    }
}
