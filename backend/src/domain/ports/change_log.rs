//! Port abstraction for the per-user change log and note table.
//!
//! One adapter call owns one database transaction: `commit` performs the
//! row-locked read, the commit decision, the note mutation, the change
//! append, and the idempotency write atomically. Pull-side reads and the
//! retention deletes are separate, idempotent operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::change::{Change, CursorWindow};
use crate::domain::device::DeviceId;
use crate::domain::note::Note;
use crate::domain::sync::{CommitOutcome, PushOperation};
use crate::domain::user::UserId;

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised by change-log adapters.
    pub enum ChangeLogError {
        /// Storage connection could not be established.
        Connection { message: String } => "change log connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "change log query failed: {message}",
        /// Change payload serialization failed.
        Serialization { message: String } => "change payload serialization failed: {message}",
        /// A change for this `(userId, requestId)` already landed and no
        /// stored response could be recovered.
        DuplicateRequest { message: String } => "duplicate sync request: {message}",
    }
}

/// Port for the authoritative note table and its append-only change log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeLogRepository: Send + Sync {
    /// Largest committed cursor for the user (0 when the log is empty).
    async fn current_cursor(&self, user_id: UserId) -> Result<i64, ChangeLogError>;

    /// Retained cursor range for the user, used to detect stale pullers.
    async fn cursor_window(&self, user_id: UserId) -> Result<CursorWindow, ChangeLogError>;

    /// Commit one operation in a single transaction.
    ///
    /// The adapter row-locks the current note, runs the pure commit decision,
    /// persists the note + change + idempotency record together, and returns
    /// the outcome. A concurrent commit of the same request id resolves to
    /// the stored response; an unresolvable duplicate surfaces as
    /// [`ChangeLogError::DuplicateRequest`].
    async fn commit(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        op: &PushOperation,
    ) -> Result<CommitOutcome, ChangeLogError>;

    /// Changes with `seq > cursor` in ascending order, capped at `limit`.
    async fn changes_since(
        &self,
        user_id: UserId,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<Change>, ChangeLogError>;

    /// All current notes for the user; tombstones filtered unless requested.
    async fn snapshot(
        &self,
        user_id: UserId,
        include_deleted: bool,
    ) -> Result<Vec<Note>, ChangeLogError>;

    /// Bootstrap-import one note.
    ///
    /// Skips silently when the `(userId, noteId)` row already exists,
    /// otherwise inserts the note (version `max(1, provided)`) plus a change
    /// row and returns the assigned cursor.
    async fn import_note(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        note: &Note,
    ) -> Result<Option<i64>, ChangeLogError>;

    /// Delete change rows created before `cutoff`. Returns rows removed.
    async fn prune_changes(&self, cutoff: DateTime<Utc>) -> Result<u64, ChangeLogError>;

    /// Delete tombstones with `deletedAt` before `cutoff_ms`. Returns rows
    /// removed.
    async fn prune_tombstones(&self, cutoff_ms: i64) -> Result<u64, ChangeLogError>;
}
