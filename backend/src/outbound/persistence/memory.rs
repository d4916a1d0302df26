//! In-process storage engine implementing every persistence port.
//!
//! Used when `DATABASE_URL` is not configured (development) and throughout
//! the test suites. Commit semantics are identical to the Postgres adapter
//! because both run the same pure decision functions; the global mutex
//! stands in for row locks, which trivially satisfies the serialization
//! guarantees. State does not survive a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::bootstrap::prepare_import;
use crate::domain::ports::{
    BootstrapRecord, BootstrapRepository, BootstrapRepositoryError, ChangeLogError,
    ChangeLogRepository, Clock, DeviceRepository, DeviceRepositoryError, IdempotencyError,
    IdempotencyStore, UserDirectory, UserDirectoryError,
};
use crate::domain::sync::{
    decide_delete, decide_upsert, AppliedOperation, CommitDecision, CommitOutcome, PushOperation,
};
use crate::domain::{
    describe_user_agent, Change, ChangeOp, CursorWindow, Device, DeviceId, ExternalUserId, Note,
    UserId,
};

#[derive(Debug, Clone)]
struct StoredResponse {
    outcome: CommitOutcome,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    next_seq: i64,
    notes: BTreeMap<(Uuid, String), Note>,
    changes: Vec<Change>,
    idempotency: HashMap<(Uuid, String), StoredResponse>,
    users: HashMap<String, Uuid>,
    devices: BTreeMap<(Uuid, Uuid), Device>,
    bootstrap: HashMap<Uuid, BootstrapRecord>,
}

/// In-memory implementation of the persistence ports.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    idempotency_ttl: chrono::Duration,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store with a 24 h idempotency TTL.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_idempotency_ttl(clock, std::time::Duration::from_secs(24 * 3600))
    }

    /// Create an empty store with an explicit idempotency TTL.
    pub fn with_idempotency_ttl(clock: Arc<dyn Clock>, ttl: std::time::Duration) -> Self {
        Self {
            clock,
            idempotency_ttl: chrono::Duration::from_std(ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Test hook: drop the change row with the given cursor, simulating a
    /// retention prune of part of the log.
    pub fn drop_change_at(&self, seq: i64) {
        self.lock().changes.retain(|change| change.seq != seq);
    }
}

#[async_trait]
impl ChangeLogRepository for MemoryStore {
    async fn current_cursor(&self, user_id: UserId) -> Result<i64, ChangeLogError> {
        let state = self.lock();
        Ok(state
            .changes
            .iter()
            .filter(|change| change.user_id == user_id)
            .map(|change| change.seq)
            .max()
            .unwrap_or(0))
    }

    async fn cursor_window(&self, user_id: UserId) -> Result<CursorWindow, ChangeLogError> {
        let state = self.lock();
        let mut seqs = state
            .changes
            .iter()
            .filter(|change| change.user_id == user_id)
            .map(|change| change.seq);
        let first = seqs.next();
        let last = seqs.last().or(first);
        Ok(CursorWindow {
            oldest: first.unwrap_or(0),
            latest: last.unwrap_or(0),
        })
    }

    async fn commit(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        op: &PushOperation,
    ) -> Result<CommitOutcome, ChangeLogError> {
        let now = self.clock.now();
        let now_ms = self.clock.now_ms();
        let user_uuid = *user_id.as_uuid();
        let mut state = self.lock();

        // The lock makes the concurrent-commit race impossible here, but a
        // retried request must still observe its original response.
        if let Some(stored) = state
            .idempotency
            .get(&(user_uuid, op.request_id.clone()))
        {
            if stored.expires_at > now {
                return Ok(stored.outcome.clone());
            }
        }

        let current = state.notes.get(&(user_uuid, op.note_id.clone())).cloned();
        let decision = match op.op {
            ChangeOp::Upsert => {
                let incoming = op.note.as_ref().ok_or_else(|| {
                    ChangeLogError::serialization("upsert operation missing note payload")
                })?;
                decide_upsert(op, incoming, current.as_ref(), &device_id, now_ms)
            }
            ChangeOp::Delete => decide_delete(op, current.as_ref(), &device_id, now_ms),
        };

        let outcome = match decision {
            CommitDecision::Conflict(conflict) => CommitOutcome::Conflict(conflict),
            CommitDecision::Apply(prepared) => {
                let seq = state.next_seq + 1;
                state.next_seq = seq;
                state
                    .notes
                    .insert((user_uuid, op.note_id.clone()), prepared.note.clone());
                state.changes.push(Change {
                    seq,
                    user_id,
                    note_id: op.note_id.clone(),
                    op: prepared.op,
                    note: prepared.note.clone(),
                    base_version: prepared.base_version,
                    new_version: prepared.new_version,
                    request_id: op.request_id.clone(),
                    device_id,
                    created_at: now,
                });
                CommitOutcome::Applied(AppliedOperation {
                    request_id: op.request_id.clone(),
                    note_id: op.note_id.clone(),
                    op: prepared.op,
                    cursor: seq,
                    note: prepared.note,
                })
            }
        };

        state.idempotency.insert(
            (user_uuid, op.request_id.clone()),
            StoredResponse {
                outcome: outcome.clone(),
                expires_at: now + self.idempotency_ttl,
            },
        );
        Ok(outcome)
    }

    async fn changes_since(
        &self,
        user_id: UserId,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<Change>, ChangeLogError> {
        let state = self.lock();
        Ok(state
            .changes
            .iter()
            .filter(|change| change.user_id == user_id && change.seq > cursor)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn snapshot(
        &self,
        user_id: UserId,
        include_deleted: bool,
    ) -> Result<Vec<Note>, ChangeLogError> {
        let state = self.lock();
        Ok(state
            .notes
            .iter()
            .filter(|((owner, _), note)| {
                *owner == *user_id.as_uuid() && (include_deleted || !note.is_deleted())
            })
            .map(|(_, note)| note.clone())
            .collect())
    }

    async fn import_note(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        note: &Note,
    ) -> Result<Option<i64>, ChangeLogError> {
        let now = self.clock.now();
        let user_uuid = *user_id.as_uuid();
        let mut state = self.lock();

        if state.notes.contains_key(&(user_uuid, note.id.clone())) {
            return Ok(None);
        }
        let prepared = prepare_import(note, &device_id);
        let seq = state.next_seq + 1;
        state.next_seq = seq;
        state
            .notes
            .insert((user_uuid, prepared.id.clone()), prepared.clone());
        state.changes.push(Change {
            seq,
            user_id,
            note_id: prepared.id.clone(),
            op: if prepared.is_deleted() {
                ChangeOp::Delete
            } else {
                ChangeOp::Upsert
            },
            note: prepared.clone(),
            base_version: 0,
            new_version: prepared.version,
            request_id: format!("bootstrap:{}", prepared.id),
            device_id,
            created_at: now,
        });
        Ok(Some(seq))
    }

    async fn prune_changes(&self, cutoff: DateTime<Utc>) -> Result<u64, ChangeLogError> {
        let mut state = self.lock();
        let before = state.changes.len();
        state.changes.retain(|change| change.created_at >= cutoff);
        Ok((before - state.changes.len()) as u64)
    }

    async fn prune_tombstones(&self, cutoff_ms: i64) -> Result<u64, ChangeLogError> {
        let mut state = self.lock();
        let before = state.notes.len();
        state
            .notes
            .retain(|_, note| note.deleted_at.is_none_or(|deleted| deleted >= cutoff_ms));
        Ok((before - state.notes.len()) as u64)
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn lookup(
        &self,
        user_id: UserId,
        request_id: &str,
    ) -> Result<Option<CommitOutcome>, IdempotencyError> {
        let now = self.clock.now();
        let state = self.lock();
        Ok(state
            .idempotency
            .get(&(*user_id.as_uuid(), request_id.to_owned()))
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.outcome.clone()))
    }

    async fn cleanup_expired(&self) -> Result<u64, IdempotencyError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let before = state.idempotency.len();
        state.idempotency.retain(|_, stored| stored.expires_at > now);
        Ok((before - state.idempotency.len()) as u64)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn resolve(&self, external_id: &ExternalUserId) -> Result<UserId, UserDirectoryError> {
        let mut state = self.lock();
        let uuid = state
            .users
            .entry(external_id.as_str().to_owned())
            .or_insert_with(Uuid::new_v4);
        Ok(UserId::from_uuid(*uuid))
    }
}

#[async_trait]
impl DeviceRepository for MemoryStore {
    async fn record_seen(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        user_agent: Option<String>,
    ) -> Result<Device, DeviceRepositoryError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let key = (*user_id.as_uuid(), *device_id.as_uuid());
        let device = state
            .devices
            .entry(key)
            .and_modify(|device| device.last_seen_at = now)
            .or_insert_with(|| {
                let (label, platform) = describe_user_agent(user_agent.as_deref());
                Device {
                    id: device_id,
                    user_id: Some(user_id),
                    label,
                    platform,
                    last_seen_at: now,
                    created_at: now,
                    revoked_at: None,
                }
            });
        Ok(device.clone())
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<Device>, DeviceRepositoryError> {
        let state = self.lock();
        let mut devices: Vec<Device> = state
            .devices
            .iter()
            .filter(|((owner, _), _)| owner == user_id.as_uuid())
            .map(|(_, device)| device.clone())
            .collect();
        devices.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(devices)
    }

    async fn revoke(
        &self,
        user_id: UserId,
        device_id: DeviceId,
    ) -> Result<bool, DeviceRepositoryError> {
        let now = self.clock.now();
        let mut state = self.lock();
        match state
            .devices
            .get_mut(&(*user_id.as_uuid(), *device_id.as_uuid()))
        {
            Some(device) if device.revoked_at.is_none() => {
                device.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl BootstrapRepository for MemoryStore {
    async fn find(
        &self,
        user_id: UserId,
    ) -> Result<Option<BootstrapRecord>, BootstrapRepositoryError> {
        let state = self.lock();
        Ok(state.bootstrap.get(user_id.as_uuid()).cloned())
    }

    async fn record(&self, record: &BootstrapRecord) -> Result<(), BootstrapRepositoryError> {
        let mut state = self.lock();
        state
            .bootstrap
            .entry(*record.user_id.as_uuid())
            .or_insert_with(|| record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::note::test_note;
    use crate::domain::ports::ManualClock;
    use rstest::rstest;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(ManualClock::at_ms(1_000_000)))
    }

    fn upsert(request_id: &str, note_id: &str, base_version: i64) -> PushOperation {
        PushOperation {
            request_id: request_id.to_owned(),
            op: ChangeOp::Upsert,
            note_id: note_id.to_owned(),
            base_version,
            note: Some(test_note(note_id, "content", 1)),
            base_note: None,
            client_changed_fields: Vec::new(),
            auto_merge_attempted: None,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn repeated_commit_replays_without_second_change_row() {
        let store = store();
        let user = UserId::random();
        let device = DeviceId::mint();
        let op = upsert("req-00000001", "n1", 0);

        let first = store.commit(user, device, &op).await.expect("commit");
        let second = store.commit(user, device, &op).await.expect("commit");
        assert_eq!(first, second);

        let changes = store.changes_since(user, 0, 100).await.expect("changes");
        assert_eq!(changes.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn versions_count_up_from_one() {
        let store = store();
        let user = UserId::random();
        let device = DeviceId::mint();

        for (i, expected_version) in [(1i64, 1i64), (2, 2), (3, 3)] {
            let op = upsert(&format!("req-0000000{i}"), "n1", expected_version - 1);
            let outcome = store.commit(user, device, &op).await.expect("commit");
            match outcome {
                CommitOutcome::Applied(applied) => {
                    assert_eq!(applied.note.version, expected_version);
                }
                CommitOutcome::Conflict(conflict) => panic!("unexpected conflict: {conflict:?}"),
            }
        }
    }

    #[rstest]
    #[tokio::test]
    async fn tombstone_prune_removes_old_tombstones() {
        let clock = ManualClock::at_ms(1_000_000);
        let store = MemoryStore::new(Arc::new(clock));
        let user = UserId::random();
        let device = DeviceId::mint();

        store
            .commit(user, device, &upsert("req-00000001", "n1", 0))
            .await
            .expect("commit");
        let delete = PushOperation {
            request_id: "req-00000002".to_owned(),
            op: ChangeOp::Delete,
            note_id: "n1".to_owned(),
            base_version: 1,
            note: None,
            base_note: None,
            client_changed_fields: Vec::new(),
            auto_merge_attempted: None,
        };
        store.commit(user, device, &delete).await.expect("commit");

        let with_deleted = store.snapshot(user, true).await.expect("snapshot");
        assert_eq!(with_deleted.len(), 1);
        assert!(with_deleted[0].is_deleted());
        let without_deleted = store.snapshot(user, false).await.expect("snapshot");
        assert!(without_deleted.is_empty());

        // Retention of -1 ms: everything already counts as aged.
        let pruned = store
            .prune_tombstones(i64::MAX)
            .await
            .expect("prune");
        assert_eq!(pruned, 1);
        assert!(store.snapshot(user, true).await.expect("snapshot").is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn import_skips_existing_rows() {
        let store = store();
        let user = UserId::random();
        let device = DeviceId::mint();

        store
            .commit(user, device, &upsert("req-00000001", "n1", 0))
            .await
            .expect("commit");
        assert_eq!(
            store
                .import_note(user, device, &test_note("n1", "dup", 1))
                .await
                .expect("import"),
            None
        );
        assert!(store
            .import_note(user, device, &test_note("n2", "fresh", 0))
            .await
            .expect("import")
            .is_some());
    }

    #[rstest]
    #[tokio::test]
    async fn expired_idempotency_entries_are_invisible_and_prunable() {
        let clock = ManualClock::at_ms(1_000_000);
        let store = MemoryStore::with_idempotency_ttl(
            Arc::new(clock.clone()),
            std::time::Duration::from_secs(60),
        );
        let user = UserId::random();
        store
            .commit(user, DeviceId::mint(), &upsert("req-00000001", "n1", 0))
            .await
            .expect("commit");

        assert!(store
            .lookup(user, "req-00000001")
            .await
            .expect("lookup")
            .is_some());

        clock.advance(chrono::Duration::seconds(61));
        assert!(store
            .lookup(user, "req-00000001")
            .await
            .expect("lookup")
            .is_none());
        assert_eq!(store.cleanup_expired().await.expect("cleanup"), 1);
    }
}
