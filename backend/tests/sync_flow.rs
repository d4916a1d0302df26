//! End-to-end sync protocol scenarios over the HTTP surface.

mod support;

use actix_web::test;
use serde_json::{json, Value};

use notesync::server::build_app;
use support::{harness, DEVICE_ID};

fn authed_post(uri: &str, user: &str, body: Value) -> actix_web::test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .insert_header(("x-dev-user-id", user))
        .insert_header(("x-device-id", DEVICE_ID))
        .set_json(body)
}

fn authed_get(uri: &str, user: &str) -> actix_web::test::TestRequest {
    test::TestRequest::get()
        .uri(uri)
        .insert_header(("x-dev-user-id", user))
        .insert_header(("x-device-id", DEVICE_ID))
}

fn new_note_push(request_id: &str, note_id: &str, content: &str, base_version: i64) -> Value {
    json!({
        "operations": [{
            "requestId": request_id,
            "op": "upsert",
            "noteId": note_id,
            "baseVersion": base_version,
            "note": {
                "id": note_id,
                "content": content,
                "createdAt": 1000,
                "updatedAt": 1000,
                "version": 1,
                "type": "NOTE",
                "isProcessed": true
            }
        }]
    })
}

#[actix_web::test]
async fn new_note_applies_at_version_one() {
    let app = test::init_service(build_app(harness().state)).await;

    let res = test::call_service(
        &app,
        authed_post(
            "/api/v2/sync/push",
            "user_s1",
            new_note_push("r1-00000001", "n1", "hi", 0),
        )
        .to_request(),
    )
    .await;
    assert!(res.status().is_success());
    // The adopted device id is echoed back.
    assert_eq!(
        res.headers()
            .get("x-device-id")
            .and_then(|value| value.to_str().ok()),
        Some(DEVICE_ID)
    );

    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["applied"][0]["note"]["version"], 1);
    assert_eq!(body["applied"][0]["cursor"], 1);
    assert_eq!(body["nextCursor"], 1);
    assert_eq!(body["conflicts"], json!([]));
}

#[actix_web::test]
async fn verbatim_replay_returns_identical_response_and_one_change() {
    let h = harness();
    let app = test::init_service(build_app(h.state.clone())).await;
    let push = new_note_push("r1-00000001", "n1", "hi", 0);

    let first: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_post("/api/v2/sync/push", "user_s2", push.clone()).to_request(),
        )
        .await,
    )
    .await;
    let second: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_post("/api/v2/sync/push", "user_s2", push).to_request(),
        )
        .await,
    )
    .await;

    assert_eq!(first, second);

    // Exactly one change row landed for the request id.
    let pull: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_get("/api/v2/sync/pull?cursor=0", "user_s2").to_request(),
        )
        .await,
    )
    .await;
    let changes = pull["changes"].as_array().expect("changes array");
    assert_eq!(
        changes
            .iter()
            .filter(|change| change["requestId"] == "r1-00000001")
            .count(),
        1
    );
}

#[actix_web::test]
async fn stale_base_version_conflicts_with_current_state() {
    let app = test::init_service(build_app(harness().state)).await;

    test::call_service(
        &app,
        authed_post(
            "/api/v2/sync/push",
            "user_s3",
            new_note_push("r1-00000001", "n1", "hi", 0),
        )
        .to_request(),
    )
    .await;

    // Second writer believes the note is still unborn.
    let body: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_post(
                "/api/v2/sync/push",
                "user_s3",
                new_note_push("r2-00000002", "n1", "rival content", 0),
            )
            .to_request(),
        )
        .await,
    )
    .await;

    assert_eq!(body["applied"], json!([]));
    assert_eq!(body["conflicts"][0]["currentVersion"], 1);
    assert_eq!(body["conflicts"][0]["baseVersion"], 0);
    assert_eq!(body["conflicts"][0]["serverNote"]["content"], "hi");
    let fields = body["conflicts"][0]["changedFields"]
        .as_array()
        .expect("changedFields");
    assert!(fields.contains(&json!("content")));
}

#[actix_web::test]
async fn delete_then_stale_upsert_reports_tombstone_conflict() {
    let app = test::init_service(build_app(harness().state)).await;
    let user = "user_s4";

    test::call_service(
        &app,
        authed_post(
            "/api/v2/sync/push",
            user,
            new_note_push("r1-00000001", "n1", "hi", 0),
        )
        .to_request(),
    )
    .await;

    // Delete at the current version: tombstone at version 2.
    let delete: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_post(
                "/api/v2/sync/push",
                user,
                json!({
                    "operations": [{
                        "requestId": "r2-00000002",
                        "op": "delete",
                        "noteId": "n1",
                        "baseVersion": 1
                    }]
                }),
            )
            .to_request(),
        )
        .await,
    )
    .await;
    assert_eq!(delete["applied"][0]["note"]["version"], 2);
    assert!(delete["applied"][0]["note"]["deletedAt"].is_i64());

    // Stale upsert against the pre-delete version conflicts.
    let conflict: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_post(
                "/api/v2/sync/push",
                user,
                new_note_push("r3-00000003", "n1", "resurrect", 1),
            )
            .to_request(),
        )
        .await,
    )
    .await;
    assert!(conflict["conflicts"][0]["serverNote"]["deletedAt"].is_i64());
    let fields = conflict["conflicts"][0]["changedFields"]
        .as_array()
        .expect("changedFields");
    assert!(fields.contains(&json!("deletedAt")));
}

#[actix_web::test]
async fn pruned_history_forces_cursor_reset() {
    let h = harness();
    let app = test::init_service(build_app(h.state.clone())).await;
    let user = "user_s5";

    for (request_id, note_id) in [("r1-00000001", "n1"), ("r2-00000002", "n2")] {
        test::call_service(
            &app,
            authed_post(
                "/api/v2/sync/push",
                user,
                new_note_push(request_id, note_id, "x", 0),
            )
            .to_request(),
        )
        .await;
    }

    // Simulate retention pruning the first change.
    h.store.drop_change_at(1);

    let reset: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_get("/api/v2/sync/pull?cursor=0", user).to_request(),
        )
        .await,
    )
    .await;
    assert_eq!(reset["changes"], json!([]));
    assert_eq!(reset["nextCursor"], 2);
    assert_eq!(reset["resetRequired"], true);
    assert_eq!(reset["resetReason"], "CURSOR_TOO_OLD");
    assert_eq!(reset["oldestAvailableCursor"], 2);
    assert_eq!(reset["latestCursor"], 2);

    // Pulling exactly at oldest - 1 streams the remaining tail.
    let tail: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_get("/api/v2/sync/pull?cursor=1", user).to_request(),
        )
        .await,
    )
    .await;
    assert_eq!(tail.get("resetRequired"), None);
    assert_eq!(tail["changes"].as_array().expect("changes").len(), 1);
    assert_eq!(tail["changes"][0]["cursor"], 2);
}

#[actix_web::test]
async fn snapshot_filters_tombstones_unless_requested() {
    let app = test::init_service(build_app(harness().state)).await;
    let user = "user_snap";

    test::call_service(
        &app,
        authed_post(
            "/api/v2/sync/push",
            user,
            new_note_push("r1-00000001", "n1", "kept", 0),
        )
        .to_request(),
    )
    .await;
    test::call_service(
        &app,
        authed_post(
            "/api/v2/sync/push",
            user,
            json!({
                "operations": [{
                    "requestId": "r2-00000002",
                    "op": "delete",
                    "noteId": "n1",
                    "baseVersion": 1
                }]
            }),
        )
        .to_request(),
    )
    .await;

    let visible: Value = test::read_body_json(
        test::call_service(&app, authed_get("/api/v2/notes", user).to_request()).await,
    )
    .await;
    assert_eq!(visible["notes"], json!([]));
    assert_eq!(visible["cursor"], 2);

    let with_deleted: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_get("/api/v2/notes?includeDeleted=true", user).to_request(),
        )
        .await,
    )
    .await;
    assert_eq!(with_deleted["notes"].as_array().expect("notes").len(), 1);
    assert!(with_deleted["notes"][0]["deletedAt"].is_i64());
}

#[actix_web::test]
async fn bootstrap_runs_at_most_once() {
    let app = test::init_service(build_app(harness().state)).await;
    let user = "user_boot";
    let body = json!({
        "notes": [
            {"id": "b1", "content": "one", "createdAt": 500, "updatedAt": 500, "version": 1, "type": "NOTE"},
            {"id": "b2", "content": "two", "createdAt": 900, "updatedAt": 900, "version": 3, "type": "TASK"}
        ],
        "sourceFingerprint": "sha256:abc"
    });

    let first: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_post("/api/v2/sync/bootstrap", user, body.clone()).to_request(),
        )
        .await,
    )
    .await;
    assert_eq!(first["imported"], 2);
    assert_eq!(first["alreadyBootstrapped"], false);
    assert_eq!(first["cursor"], 2);

    let second: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_post("/api/v2/sync/bootstrap", user, body).to_request(),
        )
        .await,
    )
    .await;
    assert_eq!(second["imported"], 2);
    assert_eq!(second["alreadyBootstrapped"], true);
    assert_eq!(second["cursor"], first["cursor"]);

    // Imported notes are visible in the snapshot.
    let snapshot: Value = test::read_body_json(
        test::call_service(&app, authed_get("/api/v2/notes", user).to_request()).await,
    )
    .await;
    assert_eq!(snapshot["notes"].as_array().expect("notes").len(), 2);
}

#[actix_web::test]
async fn push_validation_rejects_bad_operations() {
    let app = test::init_service(build_app(harness().state)).await;

    let res = test::call_service(
        &app,
        authed_post(
            "/api/v2/sync/push",
            "user_bad",
            json!({
                "operations": [{
                    "requestId": "short",
                    "op": "upsert",
                    "noteId": "n1",
                    "baseVersion": 0,
                    "note": {"id": "n1", "content": "x", "createdAt": 1, "updatedAt": 1, "version": 1, "type": "NOTE"}
                }]
            }),
        )
        .to_request(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 400);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(body["error"]["retryable"], false);
}

#[actix_web::test]
async fn users_are_isolated_from_each_other() {
    let app = test::init_service(build_app(harness().state)).await;

    test::call_service(
        &app,
        authed_post(
            "/api/v2/sync/push",
            "user_a",
            new_note_push("ra-00000001", "n1", "alpha", 0),
        )
        .to_request(),
    )
    .await;
    test::call_service(
        &app,
        authed_post(
            "/api/v2/sync/push",
            "user_b",
            new_note_push("rb-00000001", "n1", "beta", 0),
        )
        .to_request(),
    )
    .await;

    let a_pull: Value = test::read_body_json(
        test::call_service(
            &app,
            authed_get("/api/v2/sync/pull?cursor=0", "user_a").to_request(),
        )
        .await,
    )
    .await;
    let changes = a_pull["changes"].as_array().expect("changes");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["note"]["content"], "alpha");
}
