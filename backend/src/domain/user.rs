//! User identity types.
//!
//! A user is known by two identifiers: the opaque external identity asserted
//! by the identity provider, and the internal UUID every owned row hangs off.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Internal user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Wrap an existing UUID (e.g. loaded from the database).
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// External identity asserted by the identity provider.
///
/// Treated as an opaque non-empty string; the backend never parses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalUserId(String);

/// Validation error for [`ExternalUserId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("external user id must not be empty")]
pub struct EmptyExternalUserId;

impl ExternalUserId {
    /// Validate and wrap an external identity string.
    pub fn new(raw: impl Into<String>) -> Result<Self, EmptyExternalUserId> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(EmptyExternalUserId);
        }
        Ok(Self(raw))
    }

    /// Borrow the raw identity string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ExternalUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_rejects_blank_input() {
        assert!(ExternalUserId::new("  ").is_err());
        assert!(ExternalUserId::new("user_2x").is_ok());
    }

    #[test]
    fn user_id_round_trips_through_uuid() {
        let id = UserId::random();
        assert_eq!(UserId::from_uuid(*id.as_uuid()), id);
    }
}
