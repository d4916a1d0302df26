//! Bearer-path request extractor for the identity & device gate.
//!
//! Handlers take [`RequestIdentity`] as an argument; extraction runs the
//! gate (credential verification, user resolution, device binding,
//! revocation check) and stores the adopted device id for the echo
//! middleware. The SSE handshake uses the ticket path in `events.rs`
//! instead.

use actix_web::dev::Payload;
use actix_web::http::header::{AUTHORIZATION, USER_AGENT};
use actix_web::{web, FromRequest, HttpMessage, HttpRequest};
use futures_util::future::LocalBoxFuture;

use crate::domain::gate::{AuthenticatedRequest, RequestCredentials};
use crate::domain::Error;
use crate::middleware::{EchoDeviceId, TraceId, DEVICE_ID_HEADER};

use super::state::HttpState;

/// Development identity override header.
pub const DEV_USER_HEADER: &str = "x-dev-user-id";

/// Authenticated identity and device context for a handler.
#[derive(Debug, Clone)]
pub struct RequestIdentity(pub AuthenticatedRequest);

fn header_str<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|value| value.to_str().ok())
}

impl FromRequest for RequestIdentity {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let trace_id = req
                .extensions()
                .get::<TraceId>()
                .map(|trace| trace.0.clone());
            let state = req
                .app_data::<web::Data<HttpState>>()
                .cloned()
                .ok_or_else(|| Error::internal("http state missing"))?;

            let bearer = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|token| !token.is_empty());

            let credentials = RequestCredentials {
                bearer,
                dev_user_header: header_str(&req, DEV_USER_HEADER),
                device_header: header_str(&req, DEVICE_ID_HEADER),
                user_agent: req
                    .headers()
                    .get(USER_AGENT)
                    .and_then(|value| value.to_str().ok()),
            };

            let authenticated = state
                .gate
                .authenticate_bearer(credentials)
                .await
                .map_err(|err| err.with_optional_request_id(trace_id))?;

            req.extensions_mut()
                .insert(EchoDeviceId(authenticated.device.id));
            Ok(Self(authenticated))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn header_str_reads_present_headers() {
        let req = TestRequest::default()
            .insert_header((DEV_USER_HEADER, "dev_user"))
            .to_http_request();
        assert_eq!(header_str(&req, DEV_USER_HEADER), Some("dev_user"));
        assert_eq!(header_str(&req, DEVICE_ID_HEADER), None);
    }
}
