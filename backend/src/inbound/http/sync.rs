//! Push/pull sync endpoints.
//!
//! ```text
//! POST /api/v2/sync/push {"operations":[...]}
//! GET  /api/v2/sync/pull?cursor=<int>
//! ```

use actix_web::{get, post, web};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::domain::sync::{
    PullResponse, PushOperation, PushResponse, MAX_CLIENT_CHANGED_FIELDS, MIN_REQUEST_ID_LEN,
};
use crate::domain::{ChangeOp, Error};

use super::identity::RequestIdentity;
use super::state::HttpState;
use super::ApiResult;

/// Push request body.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub operations: Vec<PushOperation>,
}

/// Pull query parameters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    #[serde(default)]
    pub cursor: i64,
}

/// Validate one operation against the schema bounds.
fn validate_operation(index: usize, op: &PushOperation) -> Result<(), Error> {
    let fail = |message: String| Err(Error::bad_request(format!("operations[{index}]: {message}")));
    if op.request_id.len() < MIN_REQUEST_ID_LEN {
        return fail(format!(
            "requestId must be at least {MIN_REQUEST_ID_LEN} characters"
        ));
    }
    if op.note_id.is_empty() {
        return fail("noteId must not be empty".to_owned());
    }
    if op.base_version < 0 {
        return fail("baseVersion must be >= 0".to_owned());
    }
    if op.client_changed_fields.len() > MAX_CLIENT_CHANGED_FIELDS {
        return fail(format!(
            "clientChangedFields exceeds {MAX_CLIENT_CHANGED_FIELDS} entries"
        ));
    }
    if op.op == ChangeOp::Upsert && op.note.is_none() {
        return fail("upsert operations require a note payload".to_owned());
    }
    Ok(())
}

/// Apply a batch of sync operations.
#[utoipa::path(
    post,
    path = "/api/v2/sync/push",
    tags = ["sync"],
    request_body = PushRequest,
    responses(
        (status = 200, description = "Applied operations and conflicts", body = PushResponse),
        (status = 400, description = "Schema validation failed"),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Device revoked")
    )
)]
#[post("/sync/push")]
pub async fn push(
    state: web::Data<HttpState>,
    identity: RequestIdentity,
    body: web::Json<PushRequest>,
) -> ApiResult<web::Json<PushResponse>> {
    let limits = state.sync.limits();
    if body.operations.len() > limits.batch_limit {
        return Err(Error::bad_request(format!(
            "push batch exceeds the limit of {} operations",
            limits.batch_limit
        )));
    }
    for (index, op) in body.operations.iter().enumerate() {
        validate_operation(index, op)?;
    }

    let response = state
        .sync
        .push(identity.0.user_id, identity.0.device.id, &body.operations)
        .await?;
    Ok(web::Json(response))
}

/// Stream changes after the supplied cursor.
#[utoipa::path(
    get,
    path = "/api/v2/sync/pull",
    tags = ["sync"],
    params(("cursor" = i64, Query, description = "Last cursor the client has applied")),
    responses(
        (status = 200, description = "Changes after the cursor, or a reset signal", body = PullResponse),
        (status = 401, description = "Authentication required")
    )
)]
#[get("/sync/pull")]
pub async fn pull(
    state: web::Data<HttpState>,
    identity: RequestIdentity,
    query: web::Query<PullQuery>,
) -> ApiResult<web::Json<PullResponse>> {
    if query.cursor < 0 {
        return Err(Error::bad_request("cursor must be >= 0"));
    }
    let response = state.sync.pull(identity.0.user_id, query.cursor).await?;
    Ok(web::Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::note::test_note;
    use rstest::rstest;

    fn valid_op() -> PushOperation {
        PushOperation {
            request_id: "req-00000001".to_owned(),
            op: ChangeOp::Upsert,
            note_id: "n1".to_owned(),
            base_version: 0,
            note: Some(test_note("n1", "hi", 1)),
            base_note: None,
            client_changed_fields: Vec::new(),
            auto_merge_attempted: None,
        }
    }

    #[rstest]
    fn valid_operation_passes() {
        assert!(validate_operation(0, &valid_op()).is_ok());
    }

    #[rstest]
    fn short_request_id_is_rejected() {
        let mut op = valid_op();
        op.request_id = "short".to_owned();
        let err = validate_operation(3, &op).expect_err("must fail");
        assert!(err.message().contains("operations[3]"));
        assert!(err.message().contains("requestId"));
    }

    #[rstest]
    fn upsert_without_note_is_rejected() {
        let mut op = valid_op();
        op.note = None;
        assert!(validate_operation(0, &op).is_err());
    }

    #[rstest]
    fn delete_without_note_is_accepted() {
        let mut op = valid_op();
        op.op = ChangeOp::Delete;
        op.note = None;
        op.base_version = 1;
        assert!(validate_operation(0, &op).is_ok());
    }

    #[rstest]
    fn excessive_changed_fields_are_rejected() {
        let mut op = valid_op();
        op.client_changed_fields = (0..33).map(|i| format!("f{i}")).collect();
        assert!(validate_operation(0, &op).is_err());
    }

    #[rstest]
    fn negative_base_version_is_rejected() {
        let mut op = valid_op();
        op.base_version = -1;
        assert!(validate_operation(0, &op).is_err());
    }
}
