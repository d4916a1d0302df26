//! Identity provider adapters.
//!
//! The production adapter introspects bearer credentials against the
//! external identity provider over HTTPS. Token issuance and session
//! management stay with the provider; this backend only asks "whose
//! credential is this".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::domain::ports::{IdentityProvider, IdentityProviderError};
use crate::domain::ExternalUserId;

/// Timeout for one verification round-trip.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    user_id: String,
}

/// HTTP-introspection implementation of the `IdentityProvider` port.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    verify_url: String,
    secret_key: String,
}

impl HttpIdentityProvider {
    /// Build the adapter against the provider's verification endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(
        provider_url: &str,
        secret_key: impl Into<String>,
    ) -> Result<Self, IdentityProviderError> {
        let client = reqwest::Client::builder()
            .timeout(VERIFY_TIMEOUT)
            .build()
            .map_err(|err| IdentityProviderError::unavailable(err.to_string()))?;
        Ok(Self {
            client,
            verify_url: format!("{}/v1/tokens/verify", provider_url.trim_end_matches('/')),
            secret_key: secret_key.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify_bearer(
        &self,
        token: &str,
    ) -> Result<ExternalUserId, IdentityProviderError> {
        let response = self
            .client
            .post(&self.verify_url)
            .bearer_auth(&self.secret_key)
            .json(&VerifyRequest { token })
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() || err.is_connect() {
                    IdentityProviderError::unavailable(err.to_string())
                } else {
                    IdentityProviderError::rejected(err.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(IdentityProviderError::unavailable(format!(
                "identity provider returned {status}"
            )));
        }
        if !status.is_success() {
            debug!(%status, "bearer verification refused");
            return Err(IdentityProviderError::rejected(format!(
                "identity provider returned {status}"
            )));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|err| IdentityProviderError::rejected(err.to_string()))?;
        ExternalUserId::new(body.user_id)
            .map_err(|_| IdentityProviderError::rejected("provider returned empty user id"))
    }
}
