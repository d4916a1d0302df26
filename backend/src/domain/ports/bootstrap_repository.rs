//! Port abstraction for the one-shot bootstrap guard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::user::UserId;

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised by bootstrap record adapters.
    pub enum BootstrapRepositoryError {
        /// Storage connection could not be established.
        Connection { message: String } => "bootstrap repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "bootstrap repository query failed: {message}",
    }
}

/// One-per-user record marking that bootstrap import already ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapRecord {
    pub user_id: UserId,
    pub imported_count: i64,
    /// Fingerprint of the client dataset that was imported.
    pub source_fingerprint: String,
    /// Cursor immediately after the import finished.
    pub cursor_after_import: i64,
    pub created_at: DateTime<Utc>,
}

/// Port for reading and writing the bootstrap guard row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BootstrapRepository: Send + Sync {
    /// The record for this user, when bootstrap already ran.
    async fn find(&self, user_id: UserId)
        -> Result<Option<BootstrapRecord>, BootstrapRepositoryError>;

    /// Persist the guard row after a successful import.
    async fn record(&self, record: &BootstrapRecord) -> Result<(), BootstrapRepositoryError>;
}
