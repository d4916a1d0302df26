//! The authoritative note model and its conflict-diff rules.
//!
//! Notes live in the client's clock domain: `createdAt`, `updatedAt`,
//! `dueDate`, and `deletedAt` are millisecond epochs supplied by (or echoed
//! to) devices. The server owns `version`, `updatedAt` stamping at commit
//! time, and the `lastModifiedByDeviceId` attribution.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Maximum number of tags persisted per note; excess entries are dropped.
pub const MAX_TAGS: usize = 20;

/// Note classification as assigned by capture or the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum NoteType {
    /// Free-form note (default).
    #[default]
    Note,
    /// Actionable task.
    Task,
    /// Idea or inspiration capture.
    Idea,
}

impl NoteType {
    /// Database string representation (matches the wire spelling).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "NOTE",
            Self::Task => "TASK",
            Self::Idea => "IDEA",
        }
    }

    /// Parse the database representation, defaulting unknown values.
    pub fn from_db(raw: &str) -> Self {
        match raw {
            "TASK" => Self::Task,
            "IDEA" => Self::Idea,
            _ => Self::Note,
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NotePriority {
    Urgent,
    Normal,
    Low,
}

impl NotePriority {
    /// Database string representation (matches the wire spelling).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Parse the database representation; unknown values map to `None`.
    pub fn from_db(raw: &str) -> Option<Self> {
        match raw {
            "urgent" => Some(Self::Urgent),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Full note state as persisted and carried in change payloads.
///
/// Unset optionals are omitted on the wire to keep payloads compact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Client-assigned identifier, unique per user.
    pub id: String,
    /// Note body; required (empty only for synthesized tombstones).
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "type", default)]
    pub note_type: NoteType,
    #[serde(default)]
    pub is_processed: bool,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_pinned: bool,
    /// Due date as a millisecond epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<NotePriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Millisecond epoch; immutable after first insert.
    pub created_at: i64,
    /// Millisecond epoch; stamped server-side at commit.
    pub updated_at: i64,
    /// Strictly increasing per `(userId, noteId)`; starts at 1.
    #[serde(default = "default_version")]
    pub version: i64,
    /// Millisecond epoch; presence makes this note a tombstone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    /// Device attribution of the last committed write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by_device_id: Option<String>,
}

fn default_version() -> i64 {
    1
}

impl Note {
    /// Whether this note is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Build the minimal tombstone used when a delete targets an unknown id.
    ///
    /// Keeps the delete deterministic for clients that purge local rows
    /// before the server ever saw them.
    pub fn synthesized_tombstone(note_id: &str, device_id: &str, now_ms: i64) -> Self {
        Self {
            id: note_id.to_owned(),
            content: String::new(),
            title: None,
            tags: Vec::new(),
            note_type: NoteType::Note,
            is_processed: false,
            is_completed: false,
            is_archived: false,
            is_pinned: false,
            due_date: None,
            priority: None,
            analysis_state: None,
            analysis_version: None,
            content_hash: None,
            created_at: now_ms,
            updated_at: now_ms,
            version: 1,
            deleted_at: Some(now_ms),
            last_modified_by_device_id: Some(device_id.to_owned()),
        }
    }
}

/// Fields eligible for conflict reporting, in wire spelling.
pub const CONFLICT_FIELD_WHITELIST: [&str; 14] = [
    "content",
    "title",
    "tags",
    "type",
    "isProcessed",
    "isCompleted",
    "isArchived",
    "isPinned",
    "dueDate",
    "priority",
    "analysisState",
    "analysisVersion",
    "contentHash",
    "deletedAt",
];

/// Diff two notes over the conflict whitelist.
///
/// Arrays compare element-wise; every other field compares by equality.
fn diff_whitelisted(base: &Note, server: &Note) -> Vec<String> {
    let mut changed = Vec::new();
    let mut push_if = |differs: bool, field: &str| {
        if differs {
            changed.push(field.to_owned());
        }
    };
    push_if(base.content != server.content, "content");
    push_if(base.title != server.title, "title");
    push_if(base.tags != server.tags, "tags");
    push_if(base.note_type != server.note_type, "type");
    push_if(base.is_processed != server.is_processed, "isProcessed");
    push_if(base.is_completed != server.is_completed, "isCompleted");
    push_if(base.is_archived != server.is_archived, "isArchived");
    push_if(base.is_pinned != server.is_pinned, "isPinned");
    push_if(base.due_date != server.due_date, "dueDate");
    push_if(base.priority != server.priority, "priority");
    push_if(base.analysis_state != server.analysis_state, "analysisState");
    push_if(
        base.analysis_version != server.analysis_version,
        "analysisVersion",
    );
    push_if(base.content_hash != server.content_hash, "contentHash");
    push_if(base.deleted_at != server.deleted_at, "deletedAt");
    changed
}

/// Derive the changed-field set reported with a conflict.
///
/// When the client supplied a `baseNote` snapshot and the server has state,
/// the two are diffed over [`CONFLICT_FIELD_WHITELIST`]. Otherwise the
/// client's own `clientChangedFields` claim is filtered to the whitelist,
/// defaulting to `{content}` when nothing survives. A tombstone on the
/// server side always contributes `deletedAt`.
pub fn changed_fields(
    base: Option<&Note>,
    server: Option<&Note>,
    client_changed: &[String],
) -> Vec<String> {
    let mut fields = match (base, server) {
        (Some(base), Some(server)) => diff_whitelisted(base, server),
        _ => {
            let mut claimed: Vec<String> = client_changed
                .iter()
                .filter(|f| CONFLICT_FIELD_WHITELIST.contains(&f.as_str()))
                .cloned()
                .collect();
            if claimed.is_empty() {
                claimed.push("content".to_owned());
            }
            claimed
        }
    };
    if server.is_some_and(Note::is_deleted) && !fields.iter().any(|f| f == "deletedAt") {
        fields.push("deletedAt".to_owned());
    }
    fields
}

#[cfg(test)]
pub(crate) fn test_note(id: &str, content: &str, version: i64) -> Note {
    Note {
        id: id.to_owned(),
        content: content.to_owned(),
        title: None,
        tags: Vec::new(),
        note_type: NoteType::Note,
        is_processed: false,
        is_completed: false,
        is_archived: false,
        is_pinned: false,
        due_date: None,
        priority: None,
        analysis_state: None,
        analysis_version: None,
        content_hash: None,
        created_at: 1_000,
        updated_at: 1_000,
        version,
        deleted_at: None,
        last_modified_by_device_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn diff_reports_only_differing_whitelist_fields() {
        let base = test_note("n1", "hello", 1);
        let mut server = test_note("n1", "hello world", 2);
        server.tags = vec!["inbox".to_owned()];
        server.priority = Some(NotePriority::Urgent);

        let fields = changed_fields(Some(&base), Some(&server), &[]);
        assert_eq!(fields, vec!["content", "tags", "priority"]);
    }

    #[rstest]
    fn missing_base_falls_back_to_client_claim() {
        let server = test_note("n1", "x", 3);
        let claimed = vec!["title".to_owned(), "notAField".to_owned()];
        let fields = changed_fields(None, Some(&server), &claimed);
        assert_eq!(fields, vec!["title"]);
    }

    #[rstest]
    fn empty_client_claim_defaults_to_content() {
        let server = test_note("n1", "x", 3);
        let fields = changed_fields(None, Some(&server), &[]);
        assert_eq!(fields, vec!["content"]);
    }

    #[rstest]
    fn tombstone_always_contributes_deleted_at() {
        let base = test_note("n1", "x", 1);
        let mut server = test_note("n1", "x", 2);
        server.deleted_at = Some(5_000);

        let fields = changed_fields(Some(&base), Some(&server), &[]);
        assert!(fields.iter().any(|f| f == "deletedAt"));
        // deletedAt appears once even though the diff already found it.
        assert_eq!(fields.iter().filter(|f| *f == "deletedAt").count(), 1);
    }

    #[rstest]
    fn identical_notes_have_no_diff_but_version_is_ignored() {
        let base = test_note("n1", "same", 1);
        let server = test_note("n1", "same", 9);
        assert!(changed_fields(Some(&base), Some(&server), &[]).is_empty());
    }

    #[rstest]
    fn unset_optionals_are_omitted_from_json() {
        let note = test_note("n1", "hi", 1);
        let json = serde_json::to_value(&note).expect("serialize");
        let object = json.as_object().expect("object");
        assert!(!object.contains_key("title"));
        assert!(!object.contains_key("dueDate"));
        assert!(!object.contains_key("deletedAt"));
        assert_eq!(object["type"], "NOTE");
    }

    #[rstest]
    fn deserialization_defaults_missing_flags() {
        let note: Note = serde_json::from_str(
            r#"{"id":"n1","content":"hi","createdAt":1000,"updatedAt":1000,"version":1,"type":"NOTE","isProcessed":true}"#,
        )
        .expect("deserialize");
        assert!(note.is_processed);
        assert!(!note.is_pinned);
        assert!(note.tags.is_empty());
    }
}
