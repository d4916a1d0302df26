//! PostgreSQL-backed `IdempotencyStore` implementation using Diesel ORM.
//!
//! Writes happen inside the change-log commit transaction; this adapter
//! covers the read path (with read-time expiry, so a stale row can never be
//! replayed) and the maintenance delete.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::debug;

use crate::domain::ports::{Clock, IdempotencyError, IdempotencyStore};
use crate::domain::sync::CommitOutcome;
use crate::domain::UserId;

use super::models::IdempotencyRow;
use super::pool::{DbPool, PoolError};
use super::schema::idempotency_keys;

/// Diesel-backed implementation of the `IdempotencyStore` port.
#[derive(Clone)]
pub struct DieselIdempotencyStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl DieselIdempotencyStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

fn map_pool_error(error: PoolError) -> IdempotencyError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            IdempotencyError::connection(message)
        }
    }
}

fn map_diesel_error(error: diesel::result::Error) -> IdempotencyError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            IdempotencyError::connection("database connection closed")
        }
        other => IdempotencyError::query(other.to_string()),
    }
}

#[async_trait]
impl IdempotencyStore for DieselIdempotencyStore {
    async fn lookup(
        &self,
        user_id: UserId,
        request_id: &str,
    ) -> Result<Option<CommitOutcome>, IdempotencyError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<IdempotencyRow> = idempotency_keys::table
            .find((user_id.as_uuid(), request_id))
            .select(IdempotencyRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        if row.expires_at <= self.clock.now() {
            debug!(request_id, "idempotency entry expired at read time");
            return Ok(None);
        }
        let outcome: CommitOutcome = serde_json::from_value(row.response)
            .map_err(|err| IdempotencyError::serialization(err.to_string()))?;
        Ok(Some(outcome))
    }

    async fn cleanup_expired(&self) -> Result<u64, IdempotencyError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let deleted = diesel::delete(idempotency_keys::table)
            .filter(idempotency_keys::expires_at.lt(self.clock.now()))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        debug!(deleted, "cleaned up expired idempotency entries");
        Ok(deleted as u64)
    }
}
