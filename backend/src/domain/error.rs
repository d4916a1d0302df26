//! Domain error representation shared across adapters.
//!
//! Keep this module free from HTTP or framework concerns so the same error
//! shape can be mapped by any adapter (HTTP, SSE, background workers). Every
//! error carries a stable machine-readable code and a retryability hint so
//! clients can distinguish "fix your request" from "try again shortly".

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Stable machine-readable error code.
///
/// Conflicts and cursor resets are deliberately absent: they are success
/// payload signals, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[non_exhaustive]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing or invalid bearer credential.
    AuthRequired,
    /// The request originated from a revoked device.
    DeviceRevoked,
    /// The event-stream handshake lacked a ticket cookie.
    StreamTicketRequired,
    /// The ticket was malformed or its signature did not verify.
    StreamTicketInvalid,
    /// The ticket expired before consumption.
    StreamTicketExpired,
    /// The ticket was already consumed once.
    StreamTicketReplayed,
    /// The replay store was unreachable under strict mode.
    StreamTicketStorageUnavailable,
    /// The request is malformed or fails validation.
    BadRequest,
    /// The addressed resource or route does not exist.
    NotFound,
    /// A dependency or upstream service is unavailable.
    ServiceUnavailable,
    /// An unexpected error occurred on the server.
    InternalError,
}

impl ErrorCode {
    /// Whether a client may retry the same request unchanged.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::StreamTicketStorageUnavailable | Self::ServiceUnavailable
        )
    }
}

/// Domain error payload consumed by adapters.
///
/// ## Invariants
/// - `message` is non-empty once trimmed of whitespace.
/// - `retry_after_ms` is only meaningful when `retryable` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct Error {
    code: ErrorCode,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

impl Error {
    /// Create a new error with the code's default retryability.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        debug_assert!(!message.trim().is_empty(), "error message must not be empty");
        Self {
            code,
            message,
            retryable: code.default_retryable(),
            retry_after_ms: None,
            request_id: None,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message returned to clients.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Whether the client may retry the same request unchanged.
    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// Suggested retry delay, when known.
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after_ms
    }

    /// Correlation identifier for tracing this error across systems.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Attach a suggested retry delay; marks the error retryable.
    pub fn with_retry_after_ms(mut self, delay_ms: u64) -> Self {
        self.retryable = true;
        self.retry_after_ms = Some(delay_ms);
        self
    }

    /// Attach a request correlation identifier.
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Attach a correlation identifier if one is available.
    pub fn with_optional_request_id(self, id: Option<String>) -> Self {
        match id {
            Some(id) => self.with_request_id(id),
            None => self,
        }
    }

    /// Convenience constructor for [`ErrorCode::AuthRequired`].
    pub fn auth_required() -> Self {
        Self::new(ErrorCode::AuthRequired, "Authentication required")
    }

    /// Convenience constructor for [`ErrorCode::DeviceRevoked`].
    pub fn device_revoked() -> Self {
        Self::new(
            ErrorCode::DeviceRevoked,
            "This device has been revoked; sign in again",
        )
    }

    /// Convenience constructor for [`ErrorCode::BadRequest`].
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Convenience constructor for [`ErrorCode::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Convenience constructor for [`ErrorCode::ServiceUnavailable`].
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Convenience constructor for [`ErrorCode::InternalError`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Redact server-side details so the payload is safe to expose to clients.
    ///
    /// Internal errors keep their code, retryability, and correlation id but
    /// replace the message with a generic explanation.
    pub fn redacted_for_clients(&self) -> Self {
        if !matches!(self.code, ErrorCode::InternalError) {
            return self.clone();
        }
        let mut redacted = self.clone();
        redacted.message = "Internal server error".to_owned();
        redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorCode::AuthRequired, false)]
    #[case(ErrorCode::DeviceRevoked, false)]
    #[case(ErrorCode::BadRequest, false)]
    #[case(ErrorCode::StreamTicketReplayed, false)]
    #[case(ErrorCode::StreamTicketStorageUnavailable, true)]
    #[case(ErrorCode::ServiceUnavailable, true)]
    fn retryability_follows_code(#[case] code: ErrorCode, #[case] expected: bool) {
        assert_eq!(Error::new(code, "x").retryable(), expected);
    }

    #[rstest]
    fn retry_after_marks_retryable() {
        let err = Error::internal("boom").with_retry_after_ms(1500);
        assert!(err.retryable());
        assert_eq!(err.retry_after_ms(), Some(1500));
    }

    #[rstest]
    fn internal_errors_are_redacted() {
        let err = Error::internal("secret pool state").with_request_id("req-1");
        let redacted = err.redacted_for_clients();
        assert_eq!(redacted.message(), "Internal server error");
        assert_eq!(redacted.request_id(), Some("req-1"));
    }

    #[rstest]
    fn non_internal_errors_keep_their_message() {
        let err = Error::bad_request("batch too large");
        assert_eq!(err.redacted_for_clients().message(), "batch too large");
    }

    #[rstest]
    fn codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::StreamTicketReplayed).expect("serialize");
        assert_eq!(json, "\"STREAM_TICKET_REPLAYED\"");
    }
}
