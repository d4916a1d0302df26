//! Device identity and session records.
//!
//! Every request is bound to a device. Device ids are client-supplied UUIDs;
//! a malformed value is replaced with a server-minted UUID that the client is
//! expected to adopt (the adopted id is echoed back on every response).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::user::UserId;

/// Device identifier scoped to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Mint a fresh server-generated identifier.
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of adopting a client-supplied device id header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdoptedDeviceId {
    /// The id this request is bound to.
    pub id: DeviceId,
    /// Whether the server minted the id (the header was missing or invalid).
    pub minted: bool,
}

/// Parse the `x-device-id` header, minting a replacement when invalid.
pub fn adopt_device_id(header: Option<&str>) -> AdoptedDeviceId {
    match header.and_then(|raw| Uuid::parse_str(raw.trim()).ok()) {
        Some(uuid) => AdoptedDeviceId {
            id: DeviceId::from_uuid(uuid),
            minted: false,
        },
        None => AdoptedDeviceId {
            id: DeviceId::mint(),
            minted: true,
        },
    }
}

/// A device session row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device identifier.
    pub id: DeviceId,
    /// Owning user (not serialized; devices are always listed per user).
    #[serde(skip)]
    pub user_id: Option<UserId>,
    /// Human-readable label derived from the first-seen user agent.
    pub label: String,
    /// Coarse platform descriptor (`ios`, `android`, `macos`, ...).
    pub platform: String,
    /// Last request timestamp.
    pub last_seen_at: DateTime<Utc>,
    /// First-seen timestamp; immutable.
    pub created_at: DateTime<Utc>,
    /// Revocation timestamp; presence means the device is locked out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Whether the device has been revoked.
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Derive a `(label, platform)` pair from a user-agent string.
///
/// Heuristic only; the label is for the user's device list, not for logic.
pub fn describe_user_agent(user_agent: Option<&str>) -> (String, String) {
    let Some(ua) = user_agent else {
        return ("Unknown device".to_owned(), "unknown".to_owned());
    };
    let lower = ua.to_ascii_lowercase();
    let (label, platform) = if lower.contains("iphone") || lower.contains("ipad") {
        ("iOS device", "ios")
    } else if lower.contains("android") {
        ("Android device", "android")
    } else if lower.contains("macintosh") || lower.contains("mac os") {
        ("Mac", "macos")
    } else if lower.contains("windows") {
        ("Windows PC", "windows")
    } else if lower.contains("linux") {
        ("Linux device", "linux")
    } else {
        ("Unknown device", "unknown")
    };
    (label.to_owned(), platform.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn valid_header_is_adopted_verbatim() {
        let uuid = Uuid::new_v4();
        let adopted = adopt_device_id(Some(&uuid.to_string()));
        assert_eq!(adopted.id, DeviceId::from_uuid(uuid));
        assert!(!adopted.minted);
    }

    #[rstest]
    #[case(None)]
    #[case(Some("not-a-uuid"))]
    #[case(Some(""))]
    fn invalid_header_mints_a_replacement(#[case] header: Option<&str>) {
        let adopted = adopt_device_id(header);
        assert!(adopted.minted);
    }

    #[rstest]
    #[case(Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)"), "ios")]
    #[case(Some("Mozilla/5.0 (Linux; Android 14)"), "android")]
    #[case(Some("Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2)"), "macos")]
    #[case(Some("Mozilla/5.0 (Windows NT 10.0)"), "windows")]
    #[case(Some("curl/8.4.0"), "unknown")]
    #[case(None, "unknown")]
    fn user_agent_platform_heuristics(#[case] ua: Option<&str>, #[case] platform: &str) {
        let (_, derived) = describe_user_agent(ua);
        assert_eq!(derived, platform);
    }
}
