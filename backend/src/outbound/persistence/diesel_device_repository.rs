//! PostgreSQL-backed `DeviceRepository` implementation using Diesel ORM.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{Clock, DeviceRepository, DeviceRepositoryError};
use crate::domain::{describe_user_agent, Device, DeviceId, UserId};

use super::models::{DeviceRow, NewDeviceRow};
use super::pool::{DbPool, PoolError};
use super::schema::devices;

/// Diesel-backed implementation of the `DeviceRepository` port.
#[derive(Clone)]
pub struct DieselDeviceRepository {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl DieselDeviceRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

fn map_pool_error(error: PoolError) -> DeviceRepositoryError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            DeviceRepositoryError::connection(message)
        }
    }
}

fn map_diesel_error(error: diesel::result::Error) -> DeviceRepositoryError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            DeviceRepositoryError::connection("database connection closed")
        }
        other => DeviceRepositoryError::query(other.to_string()),
    }
}

#[async_trait]
impl DeviceRepository for DieselDeviceRepository {
    async fn record_seen(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        user_agent: Option<String>,
    ) -> Result<Device, DeviceRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let now = self.clock.now();
        let (label, platform) = describe_user_agent(user_agent.as_deref());

        let new_row = NewDeviceRow {
            id: *device_id.as_uuid(),
            user_id: *user_id.as_uuid(),
            label: &label,
            platform: &platform,
            last_seen_at: now,
        };
        // Label and platform describe the first-seen user agent and are
        // deliberately not refreshed on later requests.
        let row: DeviceRow = diesel::insert_into(devices::table)
            .values(&new_row)
            .on_conflict((devices::id, devices::user_id))
            .do_update()
            .set(devices::last_seen_at.eq(now))
            .returning(DeviceRow::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(row.into_domain())
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<Device>, DeviceRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<DeviceRow> = devices::table
            .filter(devices::user_id.eq(user_id.as_uuid()))
            .order(devices::last_seen_at.desc())
            .select(DeviceRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(DeviceRow::into_domain).collect())
    }

    async fn revoke(
        &self,
        user_id: UserId,
        device_id: DeviceId,
    ) -> Result<bool, DeviceRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(
            devices::table
                .find((device_id.as_uuid(), user_id.as_uuid()))
                .filter(devices::revoked_at.is_null()),
        )
        .set(devices::revoked_at.eq(self.clock.now()))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn pool_error_maps_to_connection_error() {
        let mapped = map_pool_error(PoolError::checkout("refused"));
        assert!(matches!(mapped, DeviceRepositoryError::Connection { .. }));
    }
}
