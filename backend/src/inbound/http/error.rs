//! HTTP adapter mapping for domain errors.
//!
//! Purpose: keep the domain error type HTTP-agnostic while letting Actix
//! handlers turn domain failures into the documented envelope
//! `{"error": {code, message, retryable, retryAfterMs?}}` with consistent
//! status codes and a `retry-after` header for retryable conditions.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::domain::{Error, ErrorCode};

/// Convenient result alias for HTTP handlers.
pub type ApiResult<T> = Result<T, Error>;

/// Wire envelope wrapping the domain error.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorEnvelope<'a> {
    pub error: &'a Error,
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::AuthRequired
        | ErrorCode::StreamTicketRequired
        | ErrorCode::StreamTicketInvalid
        | ErrorCode::StreamTicketExpired
        | ErrorCode::StreamTicketReplayed => StatusCode::UNAUTHORIZED,
        ErrorCode::DeviceRevoked => StatusCode::FORBIDDEN,
        ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::StreamTicketStorageUnavailable | ErrorCode::ServiceUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        status_for(self.code())
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let Some(retry_after_ms) = self.retry_after_ms() {
            builder.insert_header(("retry-after", retry_after_ms.div_ceil(1_000).to_string()));
        }
        let redacted = self.redacted_for_clients();
        builder.json(ErrorEnvelope { error: &redacted })
    }
}

impl From<actix_web::Error> for Error {
    fn from(err: actix_web::Error) -> Self {
        // Do not leak framework details to clients.
        error!(error = %err, "actix error promoted to domain error");
        Self::internal("Internal server error")
    }
}
