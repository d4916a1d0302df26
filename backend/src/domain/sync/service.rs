//! Push/pull orchestration over the change-log ports.
//!
//! The service owns batch ordering, idempotent replay, event publication,
//! and the cursor-reset signal. All storage semantics live behind the
//! [`ChangeLogRepository`] port.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::device::DeviceId;
use crate::domain::error::Error;
use crate::domain::ports::{
    ChangeLogError, ChangeLogRepository, IdempotencyError, IdempotencyStore, PushOutcomeKind,
    SyncEventPublisher, SyncMetrics,
};
use crate::domain::user::UserId;

use super::{
    CommitOutcome, PullChange, PullResponse, PushOperation, PushResponse, SnapshotResponse,
};

/// Reset reason reported to stale pullers.
pub const RESET_REASON_CURSOR_TOO_OLD: &str = "CURSOR_TOO_OLD";

/// Batch and page caps for the sync protocol.
#[derive(Debug, Clone, Copy)]
pub struct SyncLimits {
    /// Maximum operations accepted per push batch.
    pub batch_limit: usize,
    /// Maximum changes returned per pull.
    pub pull_limit: i64,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            pull_limit: 500,
        }
    }
}

/// Push/pull/snapshot use-cases.
pub struct SyncService {
    change_log: Arc<dyn ChangeLogRepository>,
    idempotency: Arc<dyn IdempotencyStore>,
    events: Arc<dyn SyncEventPublisher>,
    metrics: Arc<dyn SyncMetrics>,
    limits: SyncLimits,
}

fn map_change_log_error(error: ChangeLogError) -> Error {
    match error {
        ChangeLogError::Connection { message } => {
            warn!(%message, "change log unreachable");
            Error::service_unavailable("storage unavailable").with_retry_after_ms(2_000)
        }
        ChangeLogError::Query { message }
        | ChangeLogError::Serialization { message }
        | ChangeLogError::DuplicateRequest { message } => Error::internal(message),
    }
}

fn map_idempotency_error(error: IdempotencyError) -> Error {
    match error {
        IdempotencyError::Connection { message } => {
            warn!(%message, "idempotency store unreachable");
            Error::service_unavailable("storage unavailable").with_retry_after_ms(2_000)
        }
        IdempotencyError::Query { message } | IdempotencyError::Serialization { message } => {
            Error::internal(message)
        }
    }
}

impl SyncService {
    /// Wire the service to its ports.
    pub fn new(
        change_log: Arc<dyn ChangeLogRepository>,
        idempotency: Arc<dyn IdempotencyStore>,
        events: Arc<dyn SyncEventPublisher>,
        metrics: Arc<dyn SyncMetrics>,
        limits: SyncLimits,
    ) -> Self {
        Self {
            change_log,
            idempotency,
            events,
            metrics,
            limits,
        }
    }

    /// Configured batch/page caps.
    pub fn limits(&self) -> SyncLimits {
        self.limits
    }

    /// Apply a batch of operations in input order.
    ///
    /// Each operation first consults the idempotency store; a stored
    /// response is replayed verbatim without touching the log. Applied
    /// commits publish a real-time event after the transaction has landed;
    /// publish failures never fail the push.
    pub async fn push(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        operations: &[PushOperation],
    ) -> Result<PushResponse, Error> {
        if operations.len() > self.limits.batch_limit {
            return Err(Error::bad_request(format!(
                "push batch exceeds the limit of {} operations",
                self.limits.batch_limit
            )));
        }

        let pre_batch_cursor = self
            .change_log
            .current_cursor(user_id)
            .await
            .map_err(map_change_log_error)?;

        let mut applied = Vec::new();
        let mut conflicts = Vec::new();
        let mut max_applied_cursor = None;

        for op in operations {
            let outcome = match self.resolve_operation(user_id, device_id, op).await? {
                ResolvedOutcome::Replayed(outcome) => {
                    self.metrics.record_push_outcome(PushOutcomeKind::Replayed);
                    outcome
                }
                ResolvedOutcome::Fresh(outcome) => {
                    if let Some(cursor) = outcome.cursor() {
                        self.metrics.record_push_outcome(PushOutcomeKind::Applied);
                        max_applied_cursor =
                            Some(max_applied_cursor.map_or(cursor, |max: i64| max.max(cursor)));
                        self.events.publish_sync_event(user_id, cursor).await;
                    } else {
                        self.metrics.record_push_outcome(PushOutcomeKind::Conflict);
                    }
                    outcome
                }
            };
            match outcome {
                CommitOutcome::Applied(entry) => applied.push(entry),
                CommitOutcome::Conflict(conflict) => conflicts.push(conflict),
            }
        }

        Ok(PushResponse {
            applied,
            conflicts,
            next_cursor: max_applied_cursor.unwrap_or(pre_batch_cursor),
        })
    }

    async fn resolve_operation(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        op: &PushOperation,
    ) -> Result<ResolvedOutcome, Error> {
        if let Some(stored) = self
            .idempotency
            .lookup(user_id, &op.request_id)
            .await
            .map_err(map_idempotency_error)?
        {
            debug!(request_id = %op.request_id, "replaying stored sync response");
            return Ok(ResolvedOutcome::Replayed(stored));
        }

        match self.change_log.commit(user_id, device_id, op).await {
            Ok(outcome) => Ok(ResolvedOutcome::Fresh(outcome)),
            Err(ChangeLogError::DuplicateRequest { message }) => {
                // A concurrent peer committed the same request first; the
                // stored response is now authoritative.
                match self
                    .idempotency
                    .lookup(user_id, &op.request_id)
                    .await
                    .map_err(map_idempotency_error)?
                {
                    Some(stored) => Ok(ResolvedOutcome::Replayed(stored)),
                    None => {
                        self.metrics.record_write_failure();
                        Err(Error::internal(message))
                    }
                }
            }
            Err(error) => {
                self.metrics.record_write_failure();
                Err(map_change_log_error(error))
            }
        }
    }

    /// Stream changes after `cursor`, signalling a reset when the cursor
    /// predates retained history.
    pub async fn pull(&self, user_id: UserId, cursor: i64) -> Result<PullResponse, Error> {
        let window = self
            .change_log
            .cursor_window(user_id)
            .await
            .map_err(map_change_log_error)?;

        if window.requires_reset(cursor) {
            self.metrics.record_cursor_reset();
            debug!(
                cursor,
                oldest = window.oldest,
                latest = window.latest,
                "pull cursor predates retention; signalling reset"
            );
            return Ok(PullResponse {
                changes: Vec::new(),
                next_cursor: window.latest,
                reset_required: Some(true),
                reset_reason: Some(RESET_REASON_CURSOR_TOO_OLD.to_owned()),
                oldest_available_cursor: Some(window.oldest),
                latest_cursor: Some(window.latest),
            });
        }

        let changes = self
            .change_log
            .changes_since(user_id, cursor, self.limits.pull_limit)
            .await
            .map_err(map_change_log_error)?;

        let next_cursor = changes.last().map_or(cursor, |change| change.seq);
        let changes = changes
            .into_iter()
            .map(|change| PullChange {
                cursor: change.seq,
                op: change.op,
                note: change.note,
                request_id: change.request_id,
            })
            .collect();

        Ok(PullResponse {
            changes,
            next_cursor,
            reset_required: None,
            reset_reason: None,
            oldest_available_cursor: None,
            latest_cursor: None,
        })
    }

    /// Full-state snapshot for initial hydrate.
    pub async fn snapshot(
        &self,
        user_id: UserId,
        include_deleted: bool,
    ) -> Result<SnapshotResponse, Error> {
        // Cursor first: a commit racing the snapshot is then re-delivered by
        // the next pull rather than silently skipped.
        let cursor = self
            .change_log
            .current_cursor(user_id)
            .await
            .map_err(map_change_log_error)?;
        let notes = self
            .change_log
            .snapshot(user_id, include_deleted)
            .await
            .map_err(map_change_log_error)?;
        Ok(SnapshotResponse { notes, cursor })
    }
}

enum ResolvedOutcome {
    Replayed(CommitOutcome),
    Fresh(CommitOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::change::ChangeOp;
    use crate::domain::note::test_note;
    use crate::domain::ports::{
        MockChangeLogRepository, MockIdempotencyStore, MockSyncEventPublisher, MockSyncMetrics,
        NoOpSyncMetrics,
    };
    use crate::domain::sync::AppliedOperation;
    use crate::domain::ErrorCode;
    use mockall::predicate::eq;
    use rstest::rstest;

    fn upsert_op(request_id: &str, note_id: &str) -> PushOperation {
        PushOperation {
            request_id: request_id.to_owned(),
            op: ChangeOp::Upsert,
            note_id: note_id.to_owned(),
            base_version: 0,
            note: Some(test_note(note_id, "hi", 1)),
            base_note: None,
            client_changed_fields: Vec::new(),
            auto_merge_attempted: None,
        }
    }

    fn applied(request_id: &str, note_id: &str, cursor: i64) -> CommitOutcome {
        CommitOutcome::Applied(AppliedOperation {
            request_id: request_id.to_owned(),
            note_id: note_id.to_owned(),
            op: ChangeOp::Upsert,
            cursor,
            note: test_note(note_id, "hi", 1),
        })
    }

    fn service(
        change_log: MockChangeLogRepository,
        idempotency: MockIdempotencyStore,
        events: MockSyncEventPublisher,
    ) -> SyncService {
        SyncService::new(
            Arc::new(change_log),
            Arc::new(idempotency),
            Arc::new(events),
            Arc::new(NoOpSyncMetrics),
            SyncLimits::default(),
        )
    }

    #[rstest]
    #[tokio::test]
    async fn replayed_operations_skip_commit_and_events() {
        let mut change_log = MockChangeLogRepository::new();
        change_log.expect_current_cursor().returning(|_| Ok(7));
        change_log.expect_commit().never();

        let mut idempotency = MockIdempotencyStore::new();
        idempotency
            .expect_lookup()
            .returning(|_, _| Ok(Some(applied("req-00000001", "n1", 5))));

        let mut events = MockSyncEventPublisher::new();
        events.expect_publish_sync_event().never();

        let svc = service(change_log, idempotency, events);
        let response = svc
            .push(
                UserId::random(),
                DeviceId::mint(),
                &[upsert_op("req-00000001", "n1")],
            )
            .await
            .expect("push");

        assert_eq!(response.applied.len(), 1);
        // Replayed applied ops do not advance next_cursor past the pre-batch
        // cursor read.
        assert_eq!(response.next_cursor, 7);
    }

    #[rstest]
    #[tokio::test]
    async fn applied_commit_publishes_event_and_advances_cursor() {
        let user = UserId::random();
        let mut change_log = MockChangeLogRepository::new();
        change_log.expect_current_cursor().returning(|_| Ok(0));
        change_log
            .expect_commit()
            .returning(|_, _, op| Ok(applied(&op.request_id, &op.note_id, 1)));

        let mut idempotency = MockIdempotencyStore::new();
        idempotency.expect_lookup().returning(|_, _| Ok(None));

        let mut events = MockSyncEventPublisher::new();
        events
            .expect_publish_sync_event()
            .with(eq(user), eq(1))
            .times(1)
            .returning(|_, _| ());

        let svc = service(change_log, idempotency, events);
        let response = svc
            .push(user, DeviceId::mint(), &[upsert_op("req-00000001", "n1")])
            .await
            .expect("push");

        assert_eq!(response.next_cursor, 1);
        assert_eq!(response.applied[0].cursor, 1);
        assert!(response.conflicts.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let change_log = MockChangeLogRepository::new();
        let idempotency = MockIdempotencyStore::new();
        let events = MockSyncEventPublisher::new();
        let svc = service(change_log, idempotency, events);

        let ops: Vec<_> = (0..101)
            .map(|i| upsert_op(&format!("req-{i:08}"), "n1"))
            .collect();
        let err = svc
            .push(UserId::random(), DeviceId::mint(), &ops)
            .await
            .expect_err("batch should be rejected");
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_request_race_replays_stored_response() {
        let mut change_log = MockChangeLogRepository::new();
        change_log.expect_current_cursor().returning(|_| Ok(3));
        change_log
            .expect_commit()
            .returning(|_, _, _| Err(ChangeLogError::duplicate_request("peer won")));

        let mut idempotency = MockIdempotencyStore::new();
        let mut first = true;
        idempotency.expect_lookup().returning(move |_, _| {
            // Miss before the commit attempt, hit on the re-read.
            if first {
                first = false;
                Ok(None)
            } else {
                Ok(Some(applied("req-00000001", "n1", 3)))
            }
        });

        let mut events = MockSyncEventPublisher::new();
        events.expect_publish_sync_event().never();

        let svc = service(change_log, idempotency, events);
        let response = svc
            .push(
                UserId::random(),
                DeviceId::mint(),
                &[upsert_op("req-00000001", "n1")],
            )
            .await
            .expect("push");
        assert_eq!(response.applied.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn write_failure_is_counted_and_surfaced() {
        let mut change_log = MockChangeLogRepository::new();
        change_log.expect_current_cursor().returning(|_| Ok(0));
        change_log
            .expect_commit()
            .returning(|_, _, _| Err(ChangeLogError::query("disk on fire")));

        let mut idempotency = MockIdempotencyStore::new();
        idempotency.expect_lookup().returning(|_, _| Ok(None));

        let mut metrics = MockSyncMetrics::new();
        metrics.expect_record_write_failure().times(1).return_const(());
        metrics.expect_record_push_outcome().return_const(());
        metrics.expect_record_cursor_reset().return_const(());

        let svc = SyncService::new(
            Arc::new(change_log),
            Arc::new(idempotency),
            Arc::new(MockSyncEventPublisher::new()),
            Arc::new(metrics),
            SyncLimits::default(),
        );

        let err = svc
            .push(
                UserId::random(),
                DeviceId::mint(),
                &[upsert_op("req-00000001", "n1")],
            )
            .await
            .expect_err("commit failure should surface");
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[rstest]
    #[tokio::test]
    async fn stale_pull_cursor_signals_reset() {
        use crate::domain::change::CursorWindow;

        let mut change_log = MockChangeLogRepository::new();
        change_log
            .expect_cursor_window()
            .returning(|_| Ok(CursorWindow { oldest: 2, latest: 2 }));
        change_log.expect_changes_since().never();

        let svc = service(
            change_log,
            MockIdempotencyStore::new(),
            MockSyncEventPublisher::new(),
        );
        let response = svc.pull(UserId::random(), 0).await.expect("pull");

        assert!(response.changes.is_empty());
        assert_eq!(response.reset_required, Some(true));
        assert_eq!(
            response.reset_reason.as_deref(),
            Some(RESET_REASON_CURSOR_TOO_OLD)
        );
        assert_eq!(response.oldest_available_cursor, Some(2));
        assert_eq!(response.latest_cursor, Some(2));
        assert_eq!(response.next_cursor, 2);
    }
}
