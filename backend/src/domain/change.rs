//! Change-log entry types.
//!
//! A change is the durable record of one committed upsert or delete. It
//! carries the full resulting note state so replaying a change never needs a
//! join against the notes table (which may have been pruned since).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::device::DeviceId;
use super::note::Note;
use super::user::UserId;

/// Operation kind recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Upsert,
    Delete,
}

impl ChangeOp {
    /// Database string representation (matches the wire spelling).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }

    /// Parse the database representation.
    pub fn from_db(raw: &str) -> Option<Self> {
        match raw {
            "upsert" => Some(Self::Upsert),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A committed change-log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Globally monotonic sequence number; per-user order equals commit order.
    pub seq: i64,
    pub user_id: UserId,
    pub note_id: String,
    pub op: ChangeOp,
    /// Full note state after the operation.
    pub note: Note,
    pub base_version: i64,
    pub new_version: i64,
    /// Client request id that produced this change; unique per user.
    pub request_id: String,
    pub device_id: DeviceId,
    pub created_at: DateTime<Utc>,
}

/// The retained cursor range for one user's change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorWindow {
    /// Smallest retained `seq` (0 when the log is empty).
    pub oldest: i64,
    /// Largest committed `seq` (0 when the log is empty).
    pub latest: i64,
}

impl CursorWindow {
    /// Whether a puller at `cursor` predates the retained history.
    ///
    /// A cursor of exactly `oldest - 1` can still stream the remaining tail;
    /// anything older must re-bootstrap from a snapshot.
    pub fn requires_reset(&self, cursor: i64) -> bool {
        self.oldest > 0 && cursor < self.oldest - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 0, false)] // empty log never resets
    #[case(1, 5, 0, false)] // full history retained
    #[case(3, 5, 1, false)] // cursor == oldest - 1 streams the tail
    #[case(3, 5, 0, true)] // cursor predates retention
    #[case(2, 2, 0, false)] // boundary: oldest - 1 exactly
    fn reset_detection(
        #[case] oldest: i64,
        #[case] latest: i64,
        #[case] cursor: i64,
        #[case] reset: bool,
    ) {
        let window = CursorWindow { oldest, latest };
        assert_eq!(window.requires_reset(cursor), reset);
    }
}
