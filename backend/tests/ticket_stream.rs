//! Stream ticket issuance and single-use enforcement over HTTP.

mod support;

use actix_web::cookie::Cookie;
use actix_web::test;
use serde_json::Value;

use notesync::server::build_app;
use support::{harness, DEVICE_ID};

async fn issue_ticket_cookie(
    app: &impl actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse,
        Error = actix_web::Error,
    >,
    user: &str,
) -> (Cookie<'static>, Value) {
    let res = test::call_service(
        app,
        test::TestRequest::post()
            .uri("/api/v2/events/ticket")
            .insert_header(("x-dev-user-id", user))
            .insert_header(("x-device-id", DEVICE_ID))
            .to_request(),
    )
    .await;
    assert!(res.status().is_success());

    let cookie = res
        .response()
        .cookies()
        .find(|cookie| cookie.name() == "notesync_stream_ticket")
        .expect("ticket cookie set")
        .into_owned();
    let body: Value = test::read_body_json(res).await;
    (cookie, body)
}

#[actix_web::test]
async fn ticket_cookie_is_scoped_and_http_only() {
    let app = test::init_service(build_app(harness().state)).await;
    let (cookie, body) = issue_ticket_cookie(&app, "user_t1").await;

    assert_eq!(body["ok"], true);
    assert!(body["expiresAt"].is_i64());
    assert_eq!(cookie.path(), Some("/api/v2/events"));
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.max_age(), Some(actix_web::cookie::time::Duration::seconds(60)));
    // Test requests arrive on a loopback host, so Secure is off.
    assert_ne!(cookie.secure(), Some(true));
}

#[actix_web::test]
async fn ticket_opens_the_stream_once_then_replays_are_refused() {
    let app = test::init_service(build_app(harness().state)).await;
    let (cookie, _) = issue_ticket_cookie(&app, "user_t2").await;

    let first = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/v2/events")
            .cookie(cookie.clone())
            .to_request(),
    )
    .await;
    assert!(first.status().is_success());
    assert_eq!(
        first
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(
        first
            .headers()
            .get("cache-control")
            .and_then(|value| value.to_str().ok()),
        Some("no-store")
    );
    assert_eq!(
        first
            .headers()
            .get("x-accel-buffering")
            .and_then(|value| value.to_str().ok()),
        Some("no")
    );

    let second = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/v2/events")
            .cookie(cookie)
            .to_request(),
    )
    .await;
    assert_eq!(second.status().as_u16(), 401);
    let body: Value = test::read_body_json(second).await;
    assert_eq!(body["error"]["code"], "STREAM_TICKET_REPLAYED");
}

#[actix_web::test]
async fn stream_without_cookie_requires_a_ticket() {
    let app = test::init_service(build_app(harness().state)).await;
    let res = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/v2/events").to_request(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 401);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"]["code"], "STREAM_TICKET_REQUIRED");
}

#[actix_web::test]
async fn garbage_cookie_is_invalid() {
    let app = test::init_service(build_app(harness().state)).await;
    let res = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/v2/events")
            .cookie(Cookie::new("notesync_stream_ticket", "a.b.c"))
            .to_request(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 401);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"]["code"], "STREAM_TICKET_INVALID");
}

#[actix_web::test]
async fn expired_ticket_is_refused() {
    let h = harness();
    let app = test::init_service(build_app(h.state.clone())).await;
    let (cookie, _) = issue_ticket_cookie(&app, "user_t3").await;

    h.clock.advance(chrono::Duration::seconds(61));

    let res = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/v2/events")
            .cookie(cookie)
            .to_request(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 401);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"]["code"], "STREAM_TICKET_EXPIRED");
}
