//! Port abstraction for publishing real-time sync events.

use async_trait::async_trait;

use crate::domain::user::UserId;

/// Port for announcing a committed cursor to live subscribers.
///
/// Publishing is fire-and-forget by contract: a commit that has durably
/// landed must never fail because fan-out is degraded, so implementations
/// absorb distributed-channel failures into their own degradation state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncEventPublisher: Send + Sync {
    /// Announce that `user_id`'s log advanced to `cursor`.
    async fn publish_sync_event(&self, user_id: UserId, cursor: i64);
}

/// Publisher that drops every event; used where fan-out is irrelevant.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSyncEventPublisher;

#[async_trait]
impl SyncEventPublisher for NoOpSyncEventPublisher {
    async fn publish_sync_event(&self, _user_id: UserId, _cursor: i64) {}
}
