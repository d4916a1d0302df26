//! PostgreSQL-backed `ChangeLogRepository` implementation using Diesel ORM.
//!
//! The commit path is one transaction per operation: `SELECT ... FOR UPDATE`
//! on the note row serializes concurrent writers, the pure decision
//! functions compute the outcome, and the note upsert + change append +
//! idempotency write land together or not at all. The change sequence is a
//! `bigserial`, so cursor assignment is part of the same transaction and
//! per-user cursor order equals commit order.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;

use crate::domain::bootstrap::prepare_import;
use crate::domain::ports::{ChangeLogError, ChangeLogRepository, Clock};
use crate::domain::sync::{
    decide_delete, decide_upsert, AppliedOperation, CommitDecision, CommitOutcome, PushOperation,
};
use crate::domain::{Change, ChangeOp, CursorWindow, DeviceId, Note, UserId};

use super::models::{ChangeRow, NewChangeRow, NewIdempotencyRow, NoteRow, NoteUpsertRow};
use super::pool::{DbPool, PoolError};
use super::schema::{idempotency_keys, note_changes, notes};

/// Diesel-backed implementation of the `ChangeLogRepository` port.
#[derive(Clone)]
pub struct DieselChangeLog {
    pool: DbPool,
    clock: Arc<dyn Clock>,
    idempotency_ttl: chrono::Duration,
}

impl DieselChangeLog {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>, idempotency_ttl: std::time::Duration) -> Self {
        Self {
            pool,
            clock,
            idempotency_ttl: chrono::Duration::from_std(idempotency_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }
}

/// Transaction-internal error carrier.
#[derive(Debug)]
pub(crate) enum TxError {
    Diesel(diesel::result::Error),
    Payload(String),
}

impl From<diesel::result::Error> for TxError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Diesel(error)
    }
}

pub(crate) fn map_pool_error(error: PoolError) -> ChangeLogError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            ChangeLogError::connection(message)
        }
    }
}

pub(crate) fn map_diesel_error(error: diesel::result::Error) -> ChangeLogError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            debug!(message = info.message(), "unique violation on commit");
            ChangeLogError::duplicate_request("a change for this request id already landed")
        }
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            ChangeLogError::connection("database connection closed")
        }
        DieselError::NotFound => ChangeLogError::query("record not found"),
        other => ChangeLogError::query(other.to_string()),
    }
}

fn map_tx_error(error: TxError) -> ChangeLogError {
    match error {
        TxError::Diesel(error) => map_diesel_error(error),
        TxError::Payload(message) => ChangeLogError::serialization(message),
    }
}

#[async_trait]
impl ChangeLogRepository for DieselChangeLog {
    async fn current_cursor(&self, user_id: UserId) -> Result<i64, ChangeLogError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let latest: Option<i64> = note_changes::table
            .filter(note_changes::user_id.eq(user_id.as_uuid()))
            .select(diesel::dsl::max(note_changes::seq))
            .first(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(latest.unwrap_or(0))
    }

    async fn cursor_window(&self, user_id: UserId) -> Result<CursorWindow, ChangeLogError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let (oldest, latest): (Option<i64>, Option<i64>) = note_changes::table
            .filter(note_changes::user_id.eq(user_id.as_uuid()))
            .select((
                diesel::dsl::min(note_changes::seq),
                diesel::dsl::max(note_changes::seq),
            ))
            .first(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(CursorWindow {
            oldest: oldest.unwrap_or(0),
            latest: latest.unwrap_or(0),
        })
    }

    async fn commit(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        op: &PushOperation,
    ) -> Result<CommitOutcome, ChangeLogError> {
        let user_uuid = *user_id.as_uuid();
        let device_uuid = *device_id.as_uuid();
        let op = op.clone();
        let now_ms = self.clock.now_ms();
        let expires_at = self.clock.now() + self.idempotency_ttl;

        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        conn.transaction::<CommitOutcome, TxError, _>(|conn| {
            async move {
                let current_row: Option<NoteRow> = notes::table
                    .find((user_uuid, op.note_id.clone()))
                    .for_update()
                    .select(NoteRow::as_select())
                    .first(conn)
                    .await
                    .optional()?;
                let current = current_row.map(NoteRow::into_domain);

                let decision = match op.op {
                    ChangeOp::Upsert => {
                        let incoming = op.note.as_ref().ok_or_else(|| {
                            TxError::Payload("upsert operation missing note payload".to_owned())
                        })?;
                        decide_upsert(&op, incoming, current.as_ref(), &device_id, now_ms)
                    }
                    ChangeOp::Delete => decide_delete(&op, current.as_ref(), &device_id, now_ms),
                };

                let outcome = match decision {
                    CommitDecision::Conflict(conflict) => CommitOutcome::Conflict(conflict),
                    CommitDecision::Apply(prepared) => {
                        let row = NoteUpsertRow::from_domain(user_uuid, &prepared.note);
                        diesel::insert_into(notes::table)
                            .values(&row)
                            .on_conflict((notes::user_id, notes::id))
                            .do_update()
                            .set(&row)
                            .execute(conn)
                            .await?;

                        let change = NewChangeRow {
                            user_id: user_uuid,
                            note_id: op.note_id.clone(),
                            op: prepared.op.as_str().to_owned(),
                            payload: serde_json::json!({ "note": &prepared.note }),
                            base_version: prepared.base_version,
                            new_version: prepared.new_version,
                            request_id: op.request_id.clone(),
                            device_id: device_uuid,
                        };
                        let seq: i64 = diesel::insert_into(note_changes::table)
                            .values(&change)
                            .returning(note_changes::seq)
                            .get_result(conn)
                            .await?;

                        CommitOutcome::Applied(AppliedOperation {
                            request_id: op.request_id.clone(),
                            note_id: op.note_id.clone(),
                            op: prepared.op,
                            cursor: seq,
                            note: prepared.note,
                        })
                    }
                };

                let stored = NewIdempotencyRow {
                    user_id: user_uuid,
                    request_id: op.request_id.clone(),
                    response: serde_json::to_value(&outcome)
                        .map_err(|err| TxError::Payload(err.to_string()))?,
                    expires_at,
                };
                diesel::insert_into(idempotency_keys::table)
                    .values(&stored)
                    .on_conflict((idempotency_keys::user_id, idempotency_keys::request_id))
                    .do_nothing()
                    .execute(conn)
                    .await?;

                Ok(outcome)
            }
            .scope_boxed()
        })
        .await
        .map_err(map_tx_error)
    }

    async fn changes_since(
        &self,
        user_id: UserId,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<Change>, ChangeLogError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<ChangeRow> = note_changes::table
            .filter(note_changes::user_id.eq(user_id.as_uuid()))
            .filter(note_changes::seq.gt(cursor))
            .order(note_changes::seq.asc())
            .limit(limit)
            .select(ChangeRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter()
            .map(|row| row.into_domain().map_err(ChangeLogError::serialization))
            .collect()
    }

    async fn snapshot(
        &self,
        user_id: UserId,
        include_deleted: bool,
    ) -> Result<Vec<Note>, ChangeLogError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let mut query = notes::table
            .filter(notes::user_id.eq(user_id.as_uuid()))
            .select(NoteRow::as_select())
            .into_boxed();
        if !include_deleted {
            query = query.filter(notes::deleted_at.is_null());
        }
        let rows: Vec<NoteRow> = query
            .order(notes::id.asc())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(NoteRow::into_domain).collect())
    }

    async fn import_note(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        note: &Note,
    ) -> Result<Option<i64>, ChangeLogError> {
        let user_uuid = *user_id.as_uuid();
        let device_uuid = *device_id.as_uuid();
        let prepared = prepare_import(note, &device_id);

        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        conn.transaction::<Option<i64>, TxError, _>(|conn| {
            async move {
                let row = NoteUpsertRow::from_domain(user_uuid, &prepared);
                let inserted = diesel::insert_into(notes::table)
                    .values(&row)
                    .on_conflict((notes::user_id, notes::id))
                    .do_nothing()
                    .execute(conn)
                    .await?;
                if inserted == 0 {
                    return Ok(None);
                }

                let op = if prepared.is_deleted() {
                    ChangeOp::Delete
                } else {
                    ChangeOp::Upsert
                };
                let change = NewChangeRow {
                    user_id: user_uuid,
                    note_id: prepared.id.clone(),
                    op: op.as_str().to_owned(),
                    payload: serde_json::json!({ "note": &prepared }),
                    base_version: 0,
                    new_version: prepared.version,
                    request_id: format!("bootstrap:{}", prepared.id),
                    device_id: device_uuid,
                };
                let seq: i64 = diesel::insert_into(note_changes::table)
                    .values(&change)
                    .returning(note_changes::seq)
                    .get_result(conn)
                    .await?;
                Ok(Some(seq))
            }
            .scope_boxed()
        })
        .await
        .map_err(map_tx_error)
    }

    async fn prune_changes(&self, cutoff: DateTime<Utc>) -> Result<u64, ChangeLogError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let deleted = diesel::delete(note_changes::table)
            .filter(note_changes::created_at.lt(cutoff))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        debug!(deleted, %cutoff, "pruned aged change rows");
        Ok(deleted as u64)
    }

    async fn prune_tombstones(&self, cutoff_ms: i64) -> Result<u64, ChangeLogError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let deleted = diesel::delete(notes::table)
            .filter(notes::deleted_at.is_not_null())
            .filter(notes::deleted_at.lt(Some(cutoff_ms)))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        debug!(deleted, cutoff_ms, "pruned aged tombstones");
        Ok(deleted as u64)
    }
}
