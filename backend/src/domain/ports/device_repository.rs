//! Port abstraction for device session persistence.

use async_trait::async_trait;

use crate::domain::device::{Device, DeviceId};
use crate::domain::user::UserId;

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised by device repository adapters.
    pub enum DeviceRepositoryError {
        /// Storage connection could not be established.
        Connection { message: String } => "device repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "device repository query failed: {message}",
    }
}

/// Port for device rows bound to a user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Upsert the device row for this request.
    ///
    /// Creates the row on first sight (deriving label/platform from the
    /// user agent), otherwise refreshes `last_seen_at`. Returns the stored
    /// row so the caller can assert revocation without a second read.
    async fn record_seen(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        user_agent: Option<String>,
    ) -> Result<Device, DeviceRepositoryError>;

    /// All devices for the user, ordered by last-seen descending.
    async fn list(&self, user_id: UserId) -> Result<Vec<Device>, DeviceRepositoryError>;

    /// Revoke a device. Returns true iff a row transitioned to revoked.
    async fn revoke(
        &self,
        user_id: UserId,
        device_id: DeviceId,
    ) -> Result<bool, DeviceRepositoryError>;
}
