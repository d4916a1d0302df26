//! Port abstraction for bearer-credential verification.
//!
//! Token issuance and the provider protocol are out of core scope; the gate
//! only needs "is this credential valid, and whose is it".

use async_trait::async_trait;

use crate::domain::user::ExternalUserId;

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised by identity provider adapters.
    pub enum IdentityProviderError {
        /// The credential was rejected (missing, malformed, expired, ...).
        Rejected { message: String } => "credential rejected: {message}",
        /// The provider could not be reached; the request may be retried.
        Unavailable { message: String } => "identity provider unavailable: {message}",
    }
}

/// Port for verifying bearer credentials against the identity provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a bearer credential, returning the external identity it
    /// asserts.
    async fn verify_bearer(&self, token: &str)
        -> Result<ExternalUserId, IdentityProviderError>;
}

/// Provider used when no identity provider is configured.
///
/// Every bearer is rejected; in development the gate's dev override is then
/// the only way in, and in production configuration refuses to start
/// without a real provider anyway.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAllIdentityProvider;

#[async_trait]
impl IdentityProvider for RejectAllIdentityProvider {
    async fn verify_bearer(
        &self,
        _token: &str,
    ) -> Result<ExternalUserId, IdentityProviderError> {
        Err(IdentityProviderError::rejected(
            "no identity provider configured",
        ))
    }
}

/// Provider that accepts a fixed identity; used in tests.
#[derive(Debug, Clone)]
pub struct StaticIdentityProvider {
    identity: ExternalUserId,
}

impl StaticIdentityProvider {
    /// Accept every non-empty token as the given identity.
    pub fn new(identity: ExternalUserId) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify_bearer(
        &self,
        token: &str,
    ) -> Result<ExternalUserId, IdentityProviderError> {
        if token.is_empty() {
            return Err(IdentityProviderError::rejected("empty bearer token"));
        }
        Ok(self.identity.clone())
    }
}
