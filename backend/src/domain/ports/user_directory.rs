//! Port abstraction for external-identity to internal-user resolution.

use async_trait::async_trait;

use crate::domain::user::{ExternalUserId, UserId};

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised by user directory adapters.
    pub enum UserDirectoryError {
        /// Storage connection could not be established.
        Connection { message: String } => "user directory connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "user directory query failed: {message}",
    }
}

/// Port for resolving (and lazily creating) user rows.
///
/// Resolution is insert-or-touch: the first authenticated request creates
/// the row; later requests refresh `updated_at` at most once per minute to
/// keep the write amplification of hot users bounded.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve the internal id for an external identity.
    async fn resolve(&self, external_id: &ExternalUserId) -> Result<UserId, UserDirectoryError>;
}
