//! Port abstraction for idempotent response replay.
//!
//! Writes happen inside the change-log commit transaction (see the
//! `ChangeLogRepository` port); this port covers the read path and the
//! retention delete. Expiry is enforced at read time so a stale entry can
//! never be replayed, even before maintenance prunes it.

use async_trait::async_trait;

use crate::domain::sync::CommitOutcome;
use crate::domain::user::UserId;

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised by idempotency store adapters.
    pub enum IdempotencyError {
        /// Storage connection could not be established.
        Connection { message: String } => "idempotency store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "idempotency store query failed: {message}",
        /// Stored response payload could not be decoded.
        Serialization { message: String } => "idempotency payload decode failed: {message}",
    }
}

/// Port for looking up and expiring stored sync responses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// The stored response for `(userId, requestId)`, or `None` when absent
    /// or expired.
    async fn lookup(
        &self,
        user_id: UserId,
        request_id: &str,
    ) -> Result<Option<CommitOutcome>, IdempotencyError>;

    /// Delete entries whose expiry has passed. Returns rows removed.
    async fn cleanup_expired(&self) -> Result<u64, IdempotencyError>;
}
