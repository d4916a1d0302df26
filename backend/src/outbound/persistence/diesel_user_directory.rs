//! PostgreSQL-backed `UserDirectory` implementation using Diesel ORM.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::domain::ports::{Clock, UserDirectory, UserDirectoryError};
use crate::domain::{ExternalUserId, UserId};

use super::models::{NewUserRow, UserRow};
use super::pool::{DbPool, PoolError};
use super::schema::users;

/// How often `updated_at` is refreshed for an active user.
const TOUCH_INTERVAL_SECS: i64 = 60;

/// Diesel-backed implementation of the `UserDirectory` port.
#[derive(Clone)]
pub struct DieselUserDirectory {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl DieselUserDirectory {
    /// Create a new directory with the given connection pool.
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

fn map_pool_error(error: PoolError) -> UserDirectoryError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            UserDirectoryError::connection(message)
        }
    }
}

fn map_diesel_error(error: diesel::result::Error) -> UserDirectoryError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            UserDirectoryError::connection("database connection closed")
        }
        other => UserDirectoryError::query(other.to_string()),
    }
}

#[async_trait]
impl UserDirectory for DieselUserDirectory {
    async fn resolve(&self, external_id: &ExternalUserId) -> Result<UserId, UserDirectoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let now = self.clock.now();

        let existing: Option<UserRow> = users::table
            .filter(users::external_id.eq(external_id.as_str()))
            .select(UserRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        if let Some(row) = existing {
            // Touch at most once per minute to bound write amplification.
            if now - row.updated_at > chrono::Duration::seconds(TOUCH_INTERVAL_SECS) {
                diesel::update(users::table.find(row.id))
                    .set(users::updated_at.eq(now))
                    .execute(&mut conn)
                    .await
                    .map_err(map_diesel_error)?;
            }
            return Ok(UserId::from_uuid(row.id));
        }

        let new_row = NewUserRow {
            id: Uuid::new_v4(),
            external_id: external_id.as_str(),
        };
        // A concurrent first request may have inserted the same identity;
        // do_nothing + re-select keeps resolution race-safe.
        diesel::insert_into(users::table)
            .values(&new_row)
            .on_conflict(users::external_id)
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        let row: UserRow = users::table
            .filter(users::external_id.eq(external_id.as_str()))
            .select(UserRow::as_select())
            .first(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(UserId::from_uuid(row.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn pool_error_maps_to_connection_error() {
        let mapped = map_pool_error(PoolError::build("bad url"));
        assert!(matches!(mapped, UserDirectoryError::Connection { .. }));
    }
}
