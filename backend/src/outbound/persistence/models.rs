//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. They exist to satisfy Diesel's type
//! requirements and to centralize the row <-> domain conversions.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::ports::BootstrapRecord;
use crate::domain::{Change, ChangeOp, Device, DeviceId, Note, NotePriority, NoteType, UserId};

use super::schema::{devices, idempotency_keys, note_changes, notes, sync_bootstrap, users};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Row struct for reading from the users table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserRow {
    pub id: Uuid,
    #[expect(dead_code, reason = "selected for completeness; resolution keys on it")]
    pub external_id: String,
    #[expect(dead_code, reason = "schema field for audit purposes")]
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insertable struct for creating new user records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub(crate) struct NewUserRow<'a> {
    pub id: Uuid,
    pub external_id: &'a str,
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Row struct for reading from the devices table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = devices)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct DeviceRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub label: String,
    pub platform: String,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl DeviceRow {
    pub(crate) fn into_domain(self) -> Device {
        Device {
            id: DeviceId::from_uuid(self.id),
            user_id: Some(UserId::from_uuid(self.user_id)),
            label: self.label,
            platform: self.platform,
            last_seen_at: self.last_seen_at,
            created_at: self.created_at,
            revoked_at: self.revoked_at,
        }
    }
}

/// Insertable struct for creating new device records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = devices)]
pub(crate) struct NewDeviceRow<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub label: &'a str,
    pub platform: &'a str,
    pub last_seen_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notes
// ---------------------------------------------------------------------------

/// Row struct for reading from the notes table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = notes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct NoteRow {
    pub user_id: Uuid,
    pub id: String,
    pub content: String,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub note_type: String,
    pub is_processed: bool,
    pub is_completed: bool,
    pub is_archived: bool,
    pub is_pinned: bool,
    pub due_date: Option<i64>,
    pub priority: Option<String>,
    pub analysis_state: Option<String>,
    pub analysis_version: Option<i64>,
    pub content_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
    pub deleted_at: Option<i64>,
    pub last_modified_by_device_id: Option<String>,
}

impl NoteRow {
    pub(crate) fn into_domain(self) -> Note {
        Note {
            id: self.id,
            content: self.content,
            title: self.title,
            tags: self.tags,
            note_type: NoteType::from_db(&self.note_type),
            is_processed: self.is_processed,
            is_completed: self.is_completed,
            is_archived: self.is_archived,
            is_pinned: self.is_pinned,
            due_date: self.due_date,
            priority: self.priority.as_deref().and_then(NotePriority::from_db),
            analysis_state: self.analysis_state,
            analysis_version: self.analysis_version,
            content_hash: self.content_hash,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
            deleted_at: self.deleted_at,
            last_modified_by_device_id: self.last_modified_by_device_id,
        }
    }
}

/// Insert-or-update struct for note writes.
///
/// `treat_none_as_null` matters: reviving a tombstone must clear
/// `deleted_at`, so `None` writes SQL `NULL` rather than being skipped.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = notes)]
#[diesel(treat_none_as_null = true)]
pub(crate) struct NoteUpsertRow {
    pub user_id: Uuid,
    pub id: String,
    pub content: String,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub note_type: String,
    pub is_processed: bool,
    pub is_completed: bool,
    pub is_archived: bool,
    pub is_pinned: bool,
    pub due_date: Option<i64>,
    pub priority: Option<String>,
    pub analysis_state: Option<String>,
    pub analysis_version: Option<i64>,
    pub content_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
    pub deleted_at: Option<i64>,
    pub last_modified_by_device_id: Option<String>,
}

impl NoteUpsertRow {
    pub(crate) fn from_domain(user_id: Uuid, note: &Note) -> Self {
        Self {
            user_id,
            id: note.id.clone(),
            content: note.content.clone(),
            title: note.title.clone(),
            tags: note.tags.clone(),
            note_type: note.note_type.as_str().to_owned(),
            is_processed: note.is_processed,
            is_completed: note.is_completed,
            is_archived: note.is_archived,
            is_pinned: note.is_pinned,
            due_date: note.due_date,
            priority: note.priority.map(|p| p.as_str().to_owned()),
            analysis_state: note.analysis_state.clone(),
            analysis_version: note.analysis_version,
            content_hash: note.content_hash.clone(),
            created_at: note.created_at,
            updated_at: note.updated_at,
            version: note.version,
            deleted_at: note.deleted_at,
            last_modified_by_device_id: note.last_modified_by_device_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Note changes
// ---------------------------------------------------------------------------

/// Row struct for reading from the note_changes table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = note_changes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ChangeRow {
    pub seq: i64,
    pub user_id: Uuid,
    pub note_id: String,
    pub op: String,
    pub payload: serde_json::Value,
    pub base_version: i64,
    pub new_version: i64,
    pub request_id: String,
    pub device_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ChangeRow {
    pub(crate) fn into_domain(self) -> Result<Change, String> {
        let op = ChangeOp::from_db(&self.op)
            .ok_or_else(|| format!("invalid change op in database: {}", self.op))?;
        let note_value = self
            .payload
            .get("note")
            .cloned()
            .ok_or_else(|| "change payload missing note".to_owned())?;
        let note: Note = serde_json::from_value(note_value)
            .map_err(|err| format!("corrupted change payload: {err}"))?;
        Ok(Change {
            seq: self.seq,
            user_id: UserId::from_uuid(self.user_id),
            note_id: self.note_id,
            op,
            note,
            base_version: self.base_version,
            new_version: self.new_version,
            request_id: self.request_id,
            device_id: DeviceId::from_uuid(self.device_id),
            created_at: self.created_at,
        })
    }
}

/// Insertable struct for appending change records (`seq` is assigned by the
/// database sequence).
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = note_changes)]
pub(crate) struct NewChangeRow {
    pub user_id: Uuid,
    pub note_id: String,
    pub op: String,
    pub payload: serde_json::Value,
    pub base_version: i64,
    pub new_version: i64,
    pub request_id: String,
    pub device_id: Uuid,
}

// ---------------------------------------------------------------------------
// Idempotency keys
// ---------------------------------------------------------------------------

/// Row struct for reading from the idempotency_keys table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = idempotency_keys)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct IdempotencyRow {
    #[expect(dead_code, reason = "lookups filter on the key; value unused after")]
    pub user_id: Uuid,
    #[expect(dead_code, reason = "lookups filter on the key; value unused after")]
    pub request_id: String,
    pub response: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    #[expect(dead_code, reason = "schema field for audit purposes")]
    pub created_at: DateTime<Utc>,
}

/// Insertable struct for creating new idempotency records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = idempotency_keys)]
pub(crate) struct NewIdempotencyRow {
    pub user_id: Uuid,
    pub request_id: String,
    pub response: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Bootstrap records
// ---------------------------------------------------------------------------

/// Row struct for reading from the sync_bootstrap table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sync_bootstrap)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct BootstrapRow {
    pub user_id: Uuid,
    pub imported_count: i64,
    pub source_fingerprint: String,
    pub cursor_after_import: i64,
    pub created_at: DateTime<Utc>,
}

impl BootstrapRow {
    pub(crate) fn into_domain(self) -> BootstrapRecord {
        BootstrapRecord {
            user_id: UserId::from_uuid(self.user_id),
            imported_count: self.imported_count,
            source_fingerprint: self.source_fingerprint,
            cursor_after_import: self.cursor_after_import,
            created_at: self.created_at,
        }
    }
}

/// Insertable struct for the bootstrap guard row.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sync_bootstrap)]
pub(crate) struct NewBootstrapRow<'a> {
    pub user_id: Uuid,
    pub imported_count: i64,
    pub source_fingerprint: &'a str,
    pub cursor_after_import: i64,
}
