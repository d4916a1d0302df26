//! One-shot import of pre-sync local notes.
//!
//! Bootstrap runs at most once per user: the guard row in `sync_bootstrap`
//! short-circuits every later attempt with the original result, so a client
//! that crashes mid-confirmation can safely retry the call.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use super::device::DeviceId;
use super::error::Error;
use super::note::Note;
use super::ports::{
    BootstrapRecord, BootstrapRepository, BootstrapRepositoryError, ChangeLogError,
    ChangeLogRepository, Clock, SyncEventPublisher,
};
use super::user::UserId;

/// Maximum notes accepted in one bootstrap call.
pub const MAX_BOOTSTRAP_NOTES: usize = 5_000;

/// Normalize a client note for bootstrap import.
///
/// Versions below 1 are lifted to 1, tags are clamped, and the write is
/// attributed to the importing device. `createdAt` is preserved as supplied.
pub fn prepare_import(note: &Note, device_id: &DeviceId) -> Note {
    let mut prepared = note.clone();
    prepared.version = prepared.version.max(1);
    prepared.tags.truncate(crate::domain::note::MAX_TAGS);
    prepared.last_modified_by_device_id = Some(device_id.to_string());
    prepared
}

/// Result of a bootstrap call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    /// Notes imported by the run that actually executed.
    pub imported: i64,
    /// Whether a prior run already imported this user's data.
    pub already_bootstrapped: bool,
    /// Cursor immediately after the import.
    pub cursor: i64,
}

fn map_change_log_error(error: ChangeLogError) -> Error {
    match error {
        ChangeLogError::Connection { message } => {
            warn!(%message, "change log unreachable during bootstrap");
            Error::service_unavailable("storage unavailable").with_retry_after_ms(2_000)
        }
        other => Error::internal(other.to_string()),
    }
}

fn map_bootstrap_error(error: BootstrapRepositoryError) -> Error {
    match error {
        BootstrapRepositoryError::Connection { message } => {
            warn!(%message, "bootstrap repository unreachable");
            Error::service_unavailable("storage unavailable").with_retry_after_ms(2_000)
        }
        BootstrapRepositoryError::Query { message } => Error::internal(message),
    }
}

/// Bootstrap import use-case.
pub struct BootstrapService {
    change_log: Arc<dyn ChangeLogRepository>,
    records: Arc<dyn BootstrapRepository>,
    events: Arc<dyn SyncEventPublisher>,
    clock: Arc<dyn Clock>,
}

impl BootstrapService {
    /// Wire the service to its ports.
    pub fn new(
        change_log: Arc<dyn ChangeLogRepository>,
        records: Arc<dyn BootstrapRepository>,
        events: Arc<dyn SyncEventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            change_log,
            records,
            events,
            clock,
        }
    }

    /// Import a client's pre-sync notes, at most once per user.
    ///
    /// Notes import in `createdAt` order; ids the server already holds are
    /// skipped. Each inserted note appends a change row and publishes a
    /// real-time event, so other devices of the same user converge live.
    pub async fn import(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        mut notes: Vec<Note>,
        source_fingerprint: &str,
    ) -> Result<BootstrapResponse, Error> {
        if notes.len() > MAX_BOOTSTRAP_NOTES {
            return Err(Error::bad_request(format!(
                "bootstrap exceeds the limit of {MAX_BOOTSTRAP_NOTES} notes"
            )));
        }

        if let Some(existing) = self
            .records
            .find(user_id)
            .await
            .map_err(map_bootstrap_error)?
        {
            return Ok(BootstrapResponse {
                imported: existing.imported_count,
                already_bootstrapped: true,
                cursor: existing.cursor_after_import,
            });
        }

        notes.sort_by_key(|note| note.created_at);

        let mut imported = 0i64;
        for note in &notes {
            let assigned = self
                .change_log
                .import_note(user_id, device_id, note)
                .await
                .map_err(map_change_log_error)?;
            if let Some(cursor) = assigned {
                imported += 1;
                self.events.publish_sync_event(user_id, cursor).await;
            }
        }

        let cursor = self
            .change_log
            .current_cursor(user_id)
            .await
            .map_err(map_change_log_error)?;

        self.records
            .record(&BootstrapRecord {
                user_id,
                imported_count: imported,
                source_fingerprint: source_fingerprint.to_owned(),
                cursor_after_import: cursor,
                created_at: self.clock.now(),
            })
            .await
            .map_err(map_bootstrap_error)?;

        info!(%user_id, imported, cursor, "bootstrap import completed");
        Ok(BootstrapResponse {
            imported,
            already_bootstrapped: false,
            cursor,
        })
    }
}
