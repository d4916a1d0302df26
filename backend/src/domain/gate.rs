//! Identity & device gate.
//!
//! Every request outside the liveness endpoints resolves an authenticated
//! identity, binds it to a device, and refuses revoked devices. The HTTP
//! extractor and the SSE handshake both funnel through this service so the
//! two auth paths (bearer vs stream ticket) cannot diverge on device rules.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::device::{adopt_device_id, AdoptedDeviceId, DeviceId};
use super::error::Error;
use super::ports::{
    DeviceRepository, DeviceRepositoryError, IdentityProvider, IdentityProviderError,
    UserDirectory, UserDirectoryError,
};
use super::ticket::TicketClaims;
use super::user::{ExternalUserId, UserId};

/// Development-only credential bypass.
///
/// When enabled (never in production; config refuses), a request whose
/// bearer is missing or rejected may assert its identity via the
/// `x-dev-user-id` header, falling back to the configured default identity.
#[derive(Debug, Clone)]
pub struct DevAuthOverride {
    /// Identity assumed when the header is absent.
    pub default_user: Option<ExternalUserId>,
}

/// Identity and device context attached to a request.
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    pub user_id: UserId,
    pub external_id: ExternalUserId,
    /// The adopted device id, echoed back via the `x-device-id` header.
    pub device: AdoptedDeviceId,
}

/// Raw credential material extracted from a request.
#[derive(Debug, Clone, Default)]
pub struct RequestCredentials<'a> {
    /// Bearer token from the `Authorization` header, if any.
    pub bearer: Option<&'a str>,
    /// `x-dev-user-id` header value, if any.
    pub dev_user_header: Option<&'a str>,
    /// `x-device-id` header value, if any.
    pub device_header: Option<&'a str>,
    /// `User-Agent` header value, if any.
    pub user_agent: Option<&'a str>,
}

fn map_directory_error(error: UserDirectoryError) -> Error {
    match error {
        UserDirectoryError::Connection { message } => {
            warn!(%message, "user directory unreachable");
            Error::service_unavailable("storage unavailable").with_retry_after_ms(2_000)
        }
        UserDirectoryError::Query { message } => Error::internal(message),
    }
}

fn map_device_error(error: DeviceRepositoryError) -> Error {
    match error {
        DeviceRepositoryError::Connection { message } => {
            warn!(%message, "device repository unreachable");
            Error::service_unavailable("storage unavailable").with_retry_after_ms(2_000)
        }
        DeviceRepositoryError::Query { message } => Error::internal(message),
    }
}

/// Resolves identity and device context for both auth paths.
pub struct IdentityGate {
    provider: Arc<dyn IdentityProvider>,
    users: Arc<dyn UserDirectory>,
    devices: Arc<dyn DeviceRepository>,
    dev_override: Option<DevAuthOverride>,
}

impl IdentityGate {
    /// Wire the gate to its ports.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        users: Arc<dyn UserDirectory>,
        devices: Arc<dyn DeviceRepository>,
        dev_override: Option<DevAuthOverride>,
    ) -> Self {
        Self {
            provider,
            users,
            devices,
            dev_override,
        }
    }

    async fn resolve_external(
        &self,
        bearer: Option<&str>,
        dev_user_header: Option<&str>,
    ) -> Result<ExternalUserId, Error> {
        match bearer {
            Some(token) => match self.provider.verify_bearer(token).await {
                Ok(external) => Ok(external),
                Err(IdentityProviderError::Rejected { message }) => {
                    debug!(%message, "bearer rejected");
                    self.dev_identity(dev_user_header)
                        .ok_or_else(Error::auth_required)
                }
                Err(IdentityProviderError::Unavailable { message }) => {
                    warn!(%message, "identity provider unavailable");
                    Err(Error::service_unavailable("identity provider unavailable")
                        .with_retry_after_ms(2_000))
                }
            },
            None => self
                .dev_identity(dev_user_header)
                .ok_or_else(Error::auth_required),
        }
    }

    fn dev_identity(&self, dev_user_header: Option<&str>) -> Option<ExternalUserId> {
        let dev = self.dev_override.as_ref()?;
        if let Some(header) = dev_user_header {
            if let Ok(external) = ExternalUserId::new(header) {
                return Some(external);
            }
        }
        dev.default_user.clone()
    }

    async fn bind_device(
        &self,
        user_id: UserId,
        adopted: AdoptedDeviceId,
        user_agent: Option<&str>,
    ) -> Result<(), Error> {
        let device = self
            .devices
            .record_seen(user_id, adopted.id, user_agent.map(str::to_owned))
            .await
            .map_err(map_device_error)?;
        if device.is_revoked() {
            return Err(Error::device_revoked());
        }
        Ok(())
    }

    /// Gate a bearer-authenticated request.
    pub async fn authenticate_bearer(
        &self,
        credentials: RequestCredentials<'_>,
    ) -> Result<AuthenticatedRequest, Error> {
        let external_id = self
            .resolve_external(credentials.bearer, credentials.dev_user_header)
            .await?;
        let user_id = self
            .users
            .resolve(&external_id)
            .await
            .map_err(map_directory_error)?;
        let device = adopt_device_id(credentials.device_header);
        self.bind_device(user_id, device, credentials.user_agent)
            .await?;
        Ok(AuthenticatedRequest {
            user_id,
            external_id,
            device,
        })
    }

    /// Gate an SSE handshake authorized by consumed ticket claims.
    ///
    /// The device id comes from the signed claims rather than a header; a
    /// claims id that fails to parse (ticket minted before the client
    /// adopted a server id) is replaced, exactly like a malformed header.
    pub async fn authenticate_ticket(
        &self,
        claims: &TicketClaims,
        user_agent: Option<&str>,
    ) -> Result<AuthenticatedRequest, Error> {
        let external_id = ExternalUserId::new(claims.sub.clone())
            .map_err(|_| Error::auth_required())?;
        let user_id = self
            .users
            .resolve(&external_id)
            .await
            .map_err(map_directory_error)?;
        let device = match Uuid::parse_str(&claims.device_id) {
            Ok(uuid) => AdoptedDeviceId {
                id: DeviceId::from_uuid(uuid),
                minted: false,
            },
            Err(_) => AdoptedDeviceId {
                id: DeviceId::mint(),
                minted: true,
            },
        };
        self.bind_device(user_id, device, user_agent).await?;
        Ok(AuthenticatedRequest {
            user_id,
            external_id,
            device,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::Device;
    use crate::domain::ports::{
        MockDeviceRepository, MockIdentityProvider, MockUserDirectory,
    };
    use crate::domain::ErrorCode;
    use chrono::Utc;
    use rstest::rstest;

    fn device_row(revoked: bool) -> Device {
        Device {
            id: DeviceId::mint(),
            user_id: None,
            label: "Mac".to_owned(),
            platform: "macos".to_owned(),
            last_seen_at: Utc::now(),
            created_at: Utc::now(),
            revoked_at: revoked.then(Utc::now),
        }
    }

    fn gate(
        provider: MockIdentityProvider,
        users: MockUserDirectory,
        devices: MockDeviceRepository,
        dev_override: Option<DevAuthOverride>,
    ) -> IdentityGate {
        IdentityGate::new(
            Arc::new(provider),
            Arc::new(users),
            Arc::new(devices),
            dev_override,
        )
    }

    fn accepting_mocks() -> (MockIdentityProvider, MockUserDirectory, MockDeviceRepository) {
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_verify_bearer()
            .returning(|_| Ok(ExternalUserId::new("user_1").expect("id")));
        let mut users = MockUserDirectory::new();
        users.expect_resolve().returning(|_| Ok(UserId::random()));
        let mut devices = MockDeviceRepository::new();
        devices
            .expect_record_seen()
            .returning(|_, _, _| Ok(device_row(false)));
        (provider, users, devices)
    }

    #[rstest]
    #[tokio::test]
    async fn valid_bearer_with_valid_device_header_passes() {
        let (provider, users, devices) = accepting_mocks();
        let gate = gate(provider, users, devices, None);

        let device_uuid = Uuid::new_v4().to_string();
        let authenticated = gate
            .authenticate_bearer(RequestCredentials {
                bearer: Some("token"),
                device_header: Some(&device_uuid),
                ..Default::default()
            })
            .await
            .expect("authenticate");

        assert!(!authenticated.device.minted);
        assert_eq!(authenticated.external_id.as_str(), "user_1");
    }

    #[rstest]
    #[tokio::test]
    async fn missing_bearer_without_override_is_auth_required() {
        let provider = MockIdentityProvider::new();
        let users = MockUserDirectory::new();
        let devices = MockDeviceRepository::new();
        let gate = gate(provider, users, devices, None);

        let err = gate
            .authenticate_bearer(RequestCredentials::default())
            .await
            .expect_err("should refuse");
        assert_eq!(err.code(), ErrorCode::AuthRequired);
    }

    #[rstest]
    #[tokio::test]
    async fn dev_override_header_supplies_identity() {
        let mut provider = MockIdentityProvider::new();
        provider.expect_verify_bearer().never();
        let mut users = MockUserDirectory::new();
        users
            .expect_resolve()
            .withf(|external| external.as_str() == "dev_user")
            .returning(|_| Ok(UserId::random()));
        let mut devices = MockDeviceRepository::new();
        devices
            .expect_record_seen()
            .returning(|_, _, _| Ok(device_row(false)));

        let gate = gate(
            provider,
            users,
            devices,
            Some(DevAuthOverride { default_user: None }),
        );
        let authenticated = gate
            .authenticate_bearer(RequestCredentials {
                dev_user_header: Some("dev_user"),
                ..Default::default()
            })
            .await
            .expect("authenticate");
        assert_eq!(authenticated.external_id.as_str(), "dev_user");
    }

    #[rstest]
    #[tokio::test]
    async fn revoked_device_is_refused() {
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_verify_bearer()
            .returning(|_| Ok(ExternalUserId::new("user_1").expect("id")));
        let mut users = MockUserDirectory::new();
        users.expect_resolve().returning(|_| Ok(UserId::random()));
        let mut devices = MockDeviceRepository::new();
        devices
            .expect_record_seen()
            .returning(|_, _, _| Ok(device_row(true)));

        let gate = gate(provider, users, devices, None);
        let err = gate
            .authenticate_bearer(RequestCredentials {
                bearer: Some("token"),
                ..Default::default()
            })
            .await
            .expect_err("revoked");
        assert_eq!(err.code(), ErrorCode::DeviceRevoked);
        assert!(!err.retryable());
    }

    #[rstest]
    #[tokio::test]
    async fn malformed_device_header_mints_replacement() {
        let (provider, users, devices) = accepting_mocks();
        let gate = gate(provider, users, devices, None);

        let authenticated = gate
            .authenticate_bearer(RequestCredentials {
                bearer: Some("token"),
                device_header: Some("not-a-uuid"),
                ..Default::default()
            })
            .await
            .expect("authenticate");
        assert!(authenticated.device.minted);
    }

    #[rstest]
    #[tokio::test]
    async fn ticket_claims_bind_device_from_claims() {
        let mut users = MockUserDirectory::new();
        users.expect_resolve().returning(|_| Ok(UserId::random()));
        let mut devices = MockDeviceRepository::new();
        let claimed_device = Uuid::new_v4();
        devices
            .expect_record_seen()
            .withf(move |_, device_id, _| device_id.as_uuid() == &claimed_device)
            .returning(|_, _, _| Ok(device_row(false)));

        let gate = gate(MockIdentityProvider::new(), users, devices, None);
        let claims = TicketClaims {
            sub: "user_1".to_owned(),
            device_id: claimed_device.to_string(),
            iat: 0,
            exp: i64::MAX,
            jti: "jti".to_owned(),
        };
        let authenticated = gate
            .authenticate_ticket(&claims, None)
            .await
            .expect("authenticate");
        assert!(!authenticated.device.minted);
    }

    #[rstest]
    #[tokio::test]
    async fn provider_outage_is_retryable() {
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_verify_bearer()
            .returning(|_| Err(IdentityProviderError::unavailable("timeout")));
        let gate = gate(
            provider,
            MockUserDirectory::new(),
            MockDeviceRepository::new(),
            None,
        );

        let err = gate
            .authenticate_bearer(RequestCredentials {
                bearer: Some("token"),
                ..Default::default()
            })
            .await
            .expect_err("unavailable");
        assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
        assert!(err.retryable());
    }
}
