//! Snapshot endpoint for initial hydrate.

use actix_web::{get, web};
use serde::Deserialize;

use crate::domain::sync::SnapshotResponse;

use super::identity::RequestIdentity;
use super::state::HttpState;
use super::ApiResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

/// Full note listing plus the current cursor.
#[utoipa::path(
    get,
    path = "/api/v2/notes",
    tags = ["sync"],
    params(("includeDeleted" = bool, Query, description = "Include tombstoned notes")),
    responses(
        (status = 200, description = "All notes and the current cursor", body = SnapshotResponse),
        (status = 401, description = "Authentication required")
    )
)]
#[get("/notes")]
pub async fn snapshot(
    state: web::Data<HttpState>,
    identity: RequestIdentity,
    query: web::Query<SnapshotQuery>,
) -> ApiResult<web::Json<SnapshotResponse>> {
    let response = state
        .sync
        .snapshot(identity.0.user_id, query.include_deleted)
        .await?;
    Ok(web::Json(response))
}
