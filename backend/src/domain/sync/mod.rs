//! Sync protocol types and the commit decision rules.
//!
//! The decision functions here are pure: given an incoming operation and the
//! current (row-locked) note state they produce either a prepared commit or
//! a conflict report. Both the Postgres adapter and the in-memory engine run
//! the same functions inside their transactions, so optimistic-concurrency
//! semantics cannot drift between backends.

mod service;

pub use service::{SyncLimits, SyncService};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::change::ChangeOp;
use super::device::DeviceId;
use super::note::{changed_fields, Note, MAX_TAGS};

/// Minimum accepted `requestId` length.
pub const MIN_REQUEST_ID_LEN: usize = 8;
/// Maximum entries accepted in `clientChangedFields`.
pub const MAX_CLIENT_CHANGED_FIELDS: usize = 32;

/// One client-submitted sync operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushOperation {
    /// Client-generated idempotency key for this operation.
    pub request_id: String,
    pub op: ChangeOp,
    pub note_id: String,
    /// The version the client believes the server holds (0 for new notes).
    pub base_version: i64,
    /// Full note payload; required for upserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<Note>,
    /// The client's snapshot of the server state at `baseVersion`, used to
    /// derive the changed-field set on conflict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_note: Option<Note>,
    /// The client's claim of which fields it modified.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client_changed_fields: Vec<String>,
    /// Whether the client already attempted an automatic merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_merge_attempted: Option<bool>,
}

/// A successfully committed operation, as reported to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOperation {
    pub request_id: String,
    pub note_id: String,
    pub op: ChangeOp,
    /// The change-log cursor assigned to this commit.
    pub cursor: i64,
    /// The authoritative note state after the commit.
    pub note: Note,
}

/// A rejected operation with the authoritative state for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub request_id: String,
    pub note_id: String,
    /// The version the client based its edit on.
    pub base_version: i64,
    /// The version the server actually holds (0 when the note is absent).
    pub current_version: i64,
    /// Authoritative server state; absent when the note never existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_note: Option<Note>,
    /// Minimal changed-field set over the conflict whitelist.
    pub changed_fields: Vec<String>,
}

/// Outcome of one commit attempt.
///
/// Serialized form doubles as the idempotency record, so replays return the
/// byte-identical payload the first attempt produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum CommitOutcome {
    Applied(AppliedOperation),
    Conflict(SyncConflict),
}

impl CommitOutcome {
    /// The cursor assigned by an applied commit, if any.
    pub fn cursor(&self) -> Option<i64> {
        match self {
            Self::Applied(applied) => Some(applied.cursor),
            Self::Conflict(_) => None,
        }
    }
}

/// Result of a `push` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub applied: Vec<AppliedOperation>,
    pub conflicts: Vec<SyncConflict>,
    /// Maximum cursor across applied operations, or the pre-batch cursor
    /// when nothing applied.
    pub next_cursor: i64,
}

/// One change streamed to a puller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullChange {
    pub cursor: i64,
    pub op: ChangeOp,
    pub note: Note,
    pub request_id: String,
}

/// Result of a `pull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub changes: Vec<PullChange>,
    pub next_cursor: i64,
    /// Present (true) when the requested cursor predates retained history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_available_cursor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_cursor: Option<i64>,
}

/// Result of a `snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub notes: Vec<Note>,
    pub cursor: i64,
}

/// A prepared, ready-to-persist commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCommit {
    pub op: ChangeOp,
    /// Note state to persist and to embed in the change payload.
    pub note: Note,
    pub base_version: i64,
    pub new_version: i64,
}

/// Decision produced by the commit rules for one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitDecision {
    Apply(PreparedCommit),
    Conflict(SyncConflict),
}

fn conflict_for(op: &PushOperation, current: Option<&Note>) -> SyncConflict {
    let current_version = current.map_or(0, |note| note.version);
    SyncConflict {
        request_id: op.request_id.clone(),
        note_id: op.note_id.clone(),
        base_version: op.base_version,
        current_version,
        server_note: current.cloned(),
        changed_fields: changed_fields(
            op.base_note.as_ref(),
            current,
            &op.client_changed_fields,
        ),
    }
}

/// Decide an upsert against the current (locked) note state.
///
/// `incoming` is the payload from `op.note`; callers validate its presence
/// before reaching the commit path. The prepared note preserves the original
/// `createdAt` for existing rows, clamps tags to [`MAX_TAGS`], stamps
/// `updatedAt` server-side, and attributes the write to `device_id`.
pub fn decide_upsert(
    op: &PushOperation,
    incoming: &Note,
    current: Option<&Note>,
    device_id: &DeviceId,
    now_ms: i64,
) -> CommitDecision {
    let current_version = current.map_or(0, |note| note.version);
    if op.base_version != current_version {
        return CommitDecision::Conflict(conflict_for(op, current));
    }

    let new_version = current_version + 1;
    let mut note = incoming.clone();
    note.id = op.note_id.clone();
    note.tags.truncate(MAX_TAGS);
    note.version = new_version;
    note.created_at = match current {
        Some(existing) => existing.created_at,
        None if incoming.created_at > 0 => incoming.created_at,
        None => now_ms,
    };
    note.updated_at = now_ms;
    // A correct-version upsert over a tombstone revives the note.
    note.deleted_at = None;
    note.last_modified_by_device_id = Some(device_id.to_string());

    CommitDecision::Apply(PreparedCommit {
        op: ChangeOp::Upsert,
        note,
        base_version: current_version,
        new_version,
    })
}

/// Decide a delete against the current (locked) note state.
///
/// Deleting an unknown id synthesizes a version-1 tombstone so the client
/// observes a deterministic applied outcome; deleting an existing note
/// requires the usual version match and bumps the version with `deletedAt`.
pub fn decide_delete(
    op: &PushOperation,
    current: Option<&Note>,
    device_id: &DeviceId,
    now_ms: i64,
) -> CommitDecision {
    let Some(existing) = current else {
        let note = Note::synthesized_tombstone(&op.note_id, &device_id.to_string(), now_ms);
        return CommitDecision::Apply(PreparedCommit {
            op: ChangeOp::Delete,
            note,
            base_version: 0,
            new_version: 1,
        });
    };

    if op.base_version != existing.version {
        return CommitDecision::Conflict(conflict_for(op, current));
    }

    let mut note = existing.clone();
    note.version = existing.version + 1;
    note.updated_at = now_ms;
    note.deleted_at = Some(now_ms);
    note.last_modified_by_device_id = Some(device_id.to_string());

    CommitDecision::Apply(PreparedCommit {
        op: ChangeOp::Delete,
        note,
        base_version: existing.version,
        new_version: existing.version + 1,
    })
}
