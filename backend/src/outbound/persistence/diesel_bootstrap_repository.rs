//! PostgreSQL-backed `BootstrapRepository` implementation using Diesel ORM.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{BootstrapRecord, BootstrapRepository, BootstrapRepositoryError};
use crate::domain::UserId;

use super::models::{BootstrapRow, NewBootstrapRow};
use super::pool::{DbPool, PoolError};
use super::schema::sync_bootstrap;

/// Diesel-backed implementation of the `BootstrapRepository` port.
#[derive(Clone)]
pub struct DieselBootstrapRepository {
    pool: DbPool,
}

impl DieselBootstrapRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> BootstrapRepositoryError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            BootstrapRepositoryError::connection(message)
        }
    }
}

fn map_diesel_error(error: diesel::result::Error) -> BootstrapRepositoryError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            BootstrapRepositoryError::connection("database connection closed")
        }
        other => BootstrapRepositoryError::query(other.to_string()),
    }
}

#[async_trait]
impl BootstrapRepository for DieselBootstrapRepository {
    async fn find(
        &self,
        user_id: UserId,
    ) -> Result<Option<BootstrapRecord>, BootstrapRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<BootstrapRow> = sync_bootstrap::table
            .find(user_id.as_uuid())
            .select(BootstrapRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        Ok(row.map(BootstrapRow::into_domain))
    }

    async fn record(&self, record: &BootstrapRecord) -> Result<(), BootstrapRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let new_row = NewBootstrapRow {
            user_id: *record.user_id.as_uuid(),
            imported_count: record.imported_count,
            source_fingerprint: &record.source_fingerprint,
            cursor_after_import: record.cursor_after_import,
        };
        // A concurrent import finishing first keeps its record; this run's
        // results match because import itself skips existing rows.
        diesel::insert_into(sync_bootstrap::table)
            .values(&new_row)
            .on_conflict(sync_bootstrap::user_id)
            .do_nothing()
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }
}
