//! One-shot bootstrap import endpoint.

use actix_web::{post, web};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::domain::bootstrap::{BootstrapResponse, MAX_BOOTSTRAP_NOTES};
use crate::domain::{Error, Note};

use super::identity::RequestIdentity;
use super::state::HttpState;
use super::ApiResult;

/// Bootstrap request body.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapRequest {
    pub notes: Vec<Note>,
    pub source_fingerprint: String,
}

/// Import a client's pre-sync local notes (at most once per user).
#[utoipa::path(
    post,
    path = "/api/v2/sync/bootstrap",
    tags = ["sync"],
    request_body = BootstrapRequest,
    responses(
        (status = 200, description = "Import result", body = BootstrapResponse),
        (status = 400, description = "Payload exceeds limits"),
        (status = 401, description = "Authentication required")
    )
)]
#[post("/sync/bootstrap")]
pub async fn bootstrap(
    state: web::Data<HttpState>,
    identity: RequestIdentity,
    body: web::Json<BootstrapRequest>,
) -> ApiResult<web::Json<BootstrapResponse>> {
    let BootstrapRequest {
        notes,
        source_fingerprint,
    } = body.into_inner();
    if notes.len() > MAX_BOOTSTRAP_NOTES {
        return Err(Error::bad_request(format!(
            "bootstrap exceeds the limit of {MAX_BOOTSTRAP_NOTES} notes"
        )));
    }
    if source_fingerprint.trim().is_empty() {
        return Err(Error::bad_request("sourceFingerprint must not be empty"));
    }

    let response = state
        .bootstrap
        .import(
            identity.0.user_id,
            identity.0.device.id,
            notes,
            &source_fingerprint,
        )
        .await?;
    Ok(web::Json(response))
}
