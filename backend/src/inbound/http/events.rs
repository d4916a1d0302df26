//! Stream ticket issuance and the SSE event stream.
//!
//! ```text
//! POST /api/v2/events/ticket   (bearer-authenticated; sets the ticket cookie)
//! GET  /api/v2/events          (cookie-authenticated; text/event-stream)
//! ```
//!
//! SSE requests cannot reliably carry `Authorization` headers, so the
//! handshake is authorized by a single-use ticket minted over the
//! authenticated channel and delivered as an HTTP-only cookie scoped to
//! this route.

use std::sync::Arc;
use std::time::Duration;

use actix_web::cookie::{Cookie, SameSite};
use actix_web::http::header::{self, USER_AGENT};
use actix_web::web::Bytes;
use actix_web::{get, post, web, HttpMessage, HttpRequest, HttpResponse};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tracing::warn;
use utoipa::ToSchema;

use crate::domain::ports::Clock;
use crate::domain::ticket::TicketError;
use crate::domain::{Error, UserId};
use crate::middleware::EchoDeviceId;
use crate::realtime::SyncEvent;

use super::identity::RequestIdentity;
use super::state::HttpState;
use super::ApiResult;

/// Cookie carrying the stream ticket.
pub const STREAM_TICKET_COOKIE: &str = "notesync_stream_ticket";
/// Route the ticket cookie is scoped to.
pub const SSE_PATH: &str = "/api/v2/events";

/// Interval between heartbeat frames.
#[cfg(not(test))]
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
#[cfg(test)]
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);

/// Ticket issuance response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub ok: bool,
    /// Ticket expiry, epoch seconds.
    pub expires_at: i64,
}

/// Whether the request reached us on a loopback host (no `Secure` cookie).
fn is_loopback_host(host: &str) -> bool {
    let bare = host
        .rsplit_once(':')
        .map_or(host, |(name, _port)| name)
        .trim_matches(|c| c == '[' || c == ']');
    matches!(bare, "localhost" | "127.0.0.1" | "::1")
}

/// Exchange the bearer credential for a single-use stream ticket.
#[utoipa::path(
    post,
    path = "/api/v2/events/ticket",
    tags = ["events"],
    responses(
        (status = 200, description = "Ticket issued as an HTTP-only cookie", body = TicketResponse),
        (status = 401, description = "Authentication required")
    )
)]
#[post("/events/ticket")]
pub async fn issue_ticket(
    state: web::Data<HttpState>,
    identity: RequestIdentity,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let ticket = state.tickets.issue(
        identity.0.external_id.as_str(),
        &identity.0.device.id.to_string(),
    )?;

    let secure = !is_loopback_host(req.connection_info().host());
    let max_age = i64::try_from(ticket.ttl.as_secs()).unwrap_or(60);
    let cookie = Cookie::build(STREAM_TICKET_COOKIE, ticket.token.clone())
        .path(SSE_PATH)
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(actix_web::cookie::time::Duration::seconds(max_age))
        .finish();

    Ok(HttpResponse::Ok().cookie(cookie).json(TicketResponse {
        ok: true,
        expires_at: ticket.expires_at,
    }))
}

fn sse_frame(event: &str, data: &serde_json::Value) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

/// Assemble the SSE frame stream: a `ready` frame, periodic heartbeats, and
/// the caller's `sync` events. Dropping the stream (client disconnect)
/// releases the heartbeat timer and the hub subscription.
fn sse_stream(
    rx: broadcast::Receiver<SyncEvent>,
    user_id: UserId,
    clock: Arc<dyn Clock>,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    let ready_frame = sse_frame("ready", &json!({ "connectedAt": clock.now_ms() }));
    let opening = stream::once(futures_util::future::ready(Ok(ready_frame)));

    let heartbeat_clock = Arc::clone(&clock);
    let heartbeats = IntervalStream::new(interval_at(
        Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    ))
    .map(move |_| Ok(sse_frame("heartbeat", &json!({ "ts": heartbeat_clock.now_ms() }))));

    let sync_events = BroadcastStream::new(rx).filter_map(move |item| {
        futures_util::future::ready(match item {
            Ok(event) if event.user_id == user_id => Some(Ok(sse_frame(
                "sync",
                &json!({ "cursor": event.cursor, "ts": event.emitted_at }),
            ))),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                // The client recovers via its next pull; the cursor stream
                // is a hint, not the source of truth.
                warn!(skipped, "sse subscriber lagged behind the event stream");
                None
            }
        })
    });

    opening.chain(stream::select(heartbeats, sync_events))
}

/// Long-lived event stream; authorized by a single-use ticket cookie.
#[utoipa::path(
    get,
    path = "/api/v2/events",
    tags = ["events"],
    responses(
        (status = 200, description = "text/event-stream of sync cursors"),
        (status = 401, description = "Missing, invalid, expired, or replayed ticket"),
        (status = 503, description = "Replay store unavailable (strict mode)")
    )
)]
#[get("/events")]
pub async fn events(state: web::Data<HttpState>, req: HttpRequest) -> ApiResult<HttpResponse> {
    let cookie = req
        .cookie(STREAM_TICKET_COOKIE)
        .ok_or_else(|| Error::from(TicketError::Required))?;
    let claims = state.tickets.consume(cookie.value()).await?;

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok());
    let authenticated = state.gate.authenticate_ticket(&claims, user_agent).await?;
    req.extensions_mut()
        .insert(EchoDeviceId(authenticated.device.id));

    let stream = sse_stream(
        state.hub.subscribe(),
        authenticated.user_id,
        Arc::clone(&state.clock),
    );

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ManualClock;
    use rstest::rstest;

    #[rstest]
    #[case("localhost:8080", true)]
    #[case("localhost", true)]
    #[case("127.0.0.1:3000", true)]
    #[case("[::1]:8080", true)]
    #[case("notes.example.com", false)]
    #[case("notes.example.com:443", false)]
    fn loopback_detection(#[case] host: &str, #[case] loopback: bool) {
        assert_eq!(is_loopback_host(host), loopback);
    }

    #[rstest]
    fn frames_follow_sse_format() {
        let frame = sse_frame("sync", &json!({ "cursor": 7 }));
        assert_eq!(
            std::str::from_utf8(&frame).expect("utf8"),
            "event: sync\ndata: {\"cursor\":7}\n\n"
        );
    }

    #[tokio::test]
    async fn stream_opens_with_ready_and_delivers_user_events() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_ms(42));
        let (tx, rx) = broadcast::channel(8);
        let user = UserId::random();

        let mut stream = Box::pin(sse_stream(rx, user, clock));
        let first = stream.next().await.expect("ready frame").expect("frame");
        assert!(std::str::from_utf8(&first)
            .expect("utf8")
            .starts_with("event: ready\n"));

        tx.send(SyncEvent {
            user_id: UserId::random(), // someone else's event is filtered out
            cursor: 1,
            kind: "sync".to_owned(),
            emitted_at: 10,
            origin: uuid::Uuid::new_v4(),
        })
        .expect("send");
        tx.send(SyncEvent {
            user_id: user,
            cursor: 2,
            kind: "sync".to_owned(),
            emitted_at: 11,
            origin: uuid::Uuid::new_v4(),
        })
        .expect("send");

        // Skip heartbeats until the sync frame arrives.
        loop {
            let frame = stream.next().await.expect("frame").expect("frame");
            let text = std::str::from_utf8(&frame).expect("utf8");
            if text.starts_with("event: sync\n") {
                assert!(text.contains("\"cursor\":2"));
                break;
            }
            assert!(text.starts_with("event: heartbeat\n"));
        }
    }
}
