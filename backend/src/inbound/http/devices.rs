//! Device session endpoints.
//!
//! ```text
//! GET  /api/v2/devices
//! POST /api/v2/devices/{id}/revoke
//! ```

use actix_web::{get, post, web};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::ports::DeviceRepositoryError;
use crate::domain::{Device, DeviceId, Error};

use super::identity::RequestIdentity;
use super::state::HttpState;
use super::ApiResult;

/// Device listing response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListResponse {
    pub devices: Vec<Device>,
    /// The id this request was served under, so the client can mark itself.
    pub current_device_id: DeviceId,
}

/// Revocation response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevokeResponse {
    pub ok: bool,
    pub revoked_device_id: DeviceId,
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

/// List the caller's devices, most recently seen first.
#[utoipa::path(
    get,
    path = "/api/v2/devices",
    tags = ["devices"],
    responses(
        (status = 200, description = "Devices for the authenticated user", body = DeviceListResponse),
        (status = 401, description = "Authentication required")
    )
)]
#[get("/devices")]
pub async fn list_devices(
    state: web::Data<HttpState>,
    identity: RequestIdentity,
) -> ApiResult<web::Json<DeviceListResponse>> {
    let devices = state
        .devices
        .list(identity.0.user_id)
        .await
        .map_err(map_device_error)?;
    Ok(web::Json(DeviceListResponse {
        devices,
        current_device_id: identity.0.device.id,
    }))
}

/// Revoke a device; its next request will be refused by the gate.
#[utoipa::path(
    post,
    path = "/api/v2/devices/{id}/revoke",
    tags = ["devices"],
    params(("id" = Uuid, Path, description = "Device id to revoke")),
    responses(
        (status = 200, description = "Device revoked", body = RevokeResponse),
        (status = 404, description = "No such active device"),
        (status = 401, description = "Authentication required")
    )
)]
#[post("/devices/{id}/revoke")]
pub async fn revoke_device(
    state: web::Data<HttpState>,
    identity: RequestIdentity,
    path: web::Path<String>,
) -> ApiResult<web::Json<RevokeResponse>> {
    let device_id = Uuid::parse_str(&path.into_inner())
        .map(DeviceId::from_uuid)
        .map_err(|_| Error::bad_request("device id must be a UUID"))?;

    let revoked = state
        .devices
        .revoke(identity.0.user_id, device_id)
        .await
        .map_err(map_device_error)?;
    if !revoked {
        return Err(Error::not_found("no active device with this id"));
    }
    Ok(web::Json(RevokeResponse {
        ok: true,
        revoked_device_id: device_id,
    }))
}
