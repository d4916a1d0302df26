//! Single-use stream tickets for the SSE handshake.
//!
//! SSE requests cannot reliably carry `Authorization` headers, so clients
//! exchange their bearer for a short-lived ticket over an authenticated
//! call. The ticket is a dotted triple `<headerB64>.<claimsB64>.<sigB64>`
//! (base64url, no padding) signed with HMAC-SHA-256. Consumption records the
//! ticket id in a shared replay store; only the recording consumption wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::error::{Error, ErrorCode};
use super::ports::{Clock, ReplayOutcome, ReplayStoreError, TicketReplayStore};

/// `typ` value identifying a stream ticket.
pub const TICKET_TYPE: &str = "PBST";
/// Default ticket lifetime.
pub const DEFAULT_TICKET_TTL: Duration = Duration::from_secs(60);

type HmacSha256 = Hmac<Sha256>;

/// Ticket verification/consumption failures, mapped 1:1 onto error codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    #[error("stream ticket missing")]
    Required,
    #[error("stream ticket malformed or signature mismatch")]
    Invalid,
    #[error("stream ticket expired")]
    Expired,
    #[error("stream ticket already consumed")]
    Replayed,
    #[error("stream ticket replay store unavailable")]
    StorageUnavailable,
}

impl From<TicketError> for Error {
    fn from(error: TicketError) -> Self {
        let code = match error {
            TicketError::Required => ErrorCode::StreamTicketRequired,
            TicketError::Invalid => ErrorCode::StreamTicketInvalid,
            TicketError::Expired => ErrorCode::StreamTicketExpired,
            TicketError::Replayed => ErrorCode::StreamTicketReplayed,
            TicketError::StorageUnavailable => ErrorCode::StreamTicketStorageUnavailable,
        };
        let mapped = Self::new(code, error.to_string());
        if code == ErrorCode::StreamTicketStorageUnavailable {
            mapped.with_retry_after_ms(1_000)
        } else {
            mapped
        }
    }
}

/// Replay-store failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// Production: refuse the handshake when single-use cannot be enforced.
    Strict,
    /// Non-production: accept the ticket and count the bypass.
    BestEffort,
}

impl ReplayPolicy {
    /// Descriptor used in telemetry and the readiness report.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::BestEffort => "best-effort",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct TicketHeader {
    alg: String,
    typ: String,
}

/// Signed ticket claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketClaims {
    /// External user identity the ticket authorizes.
    pub sub: String,
    /// Device the ticket is bound to.
    pub device_id: String,
    /// Issued-at, epoch seconds.
    pub iat: i64,
    /// Expiry, epoch seconds (exclusive).
    pub exp: i64,
    /// Unique ticket id used for replay detection.
    pub jti: String,
}

/// A freshly issued ticket.
#[derive(Debug, Clone)]
pub struct IssuedTicket {
    /// The signed dotted-triple token.
    pub token: String,
    /// Expiry, epoch seconds.
    pub expires_at: i64,
    /// Lifetime used for the cookie `Max-Age`.
    pub ttl: Duration,
}

/// Consumption telemetry counters.
///
/// Degradation dwell tracks how long the replay store has been unreachable;
/// the readiness report and `/metrics` surface the snapshot.
#[derive(Debug, Default)]
pub struct TicketTelemetry {
    attempts: AtomicU64,
    successes: AtomicU64,
    replay_rejections: AtomicU64,
    fail_open_bypasses: AtomicU64,
    storage_errors: AtomicU64,
    degraded_transitions: AtomicU64,
    total_degraded_ms: AtomicU64,
    degraded_since: Mutex<Option<Instant>>,
}

/// Serializable view of [`TicketTelemetry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketTelemetrySnapshot {
    /// Failure policy in effect (`strict` | `best-effort`).
    pub mode: &'static str,
    /// Replay store backend (`redis` | `memory`).
    pub backend: &'static str,
    pub degraded: bool,
    pub degraded_for_ms: u64,
    pub total_degraded_ms: u64,
    pub degraded_transitions: u64,
    pub attempts: u64,
    pub successes: u64,
    pub replay_rejections: u64,
    pub fail_open_bypasses: u64,
    pub storage_errors: u64,
}

impl TicketTelemetry {
    fn mark_degraded(&self) {
        let mut since = self
            .degraded_since
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if since.is_none() {
            *since = Some(Instant::now());
            self.degraded_transitions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn mark_healthy(&self) {
        let mut since = self
            .degraded_since
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(started) = since.take() {
            let dwell = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.total_degraded_ms.fetch_add(dwell, Ordering::Relaxed);
        }
    }

    fn snapshot(&self, mode: &'static str, backend: &'static str) -> TicketTelemetrySnapshot {
        let since = self
            .degraded_since
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let degraded_for_ms = since
            .map(|started| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        TicketTelemetrySnapshot {
            mode,
            backend,
            degraded: since.is_some(),
            degraded_for_ms,
            total_degraded_ms: self.total_degraded_ms.load(Ordering::Relaxed),
            degraded_transitions: self.degraded_transitions.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            replay_rejections: self.replay_rejections.load(Ordering::Relaxed),
            fail_open_bypasses: self.fail_open_bypasses.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }
}

/// Issues and consumes single-use stream tickets.
pub struct StreamTicketService {
    secret: Zeroizing<Vec<u8>>,
    ttl: Duration,
    policy: ReplayPolicy,
    replay: Arc<dyn TicketReplayStore>,
    clock: Arc<dyn Clock>,
    telemetry: TicketTelemetry,
}

impl StreamTicketService {
    /// Wire the service to its replay store and clock.
    pub fn new(
        secret: impl Into<Vec<u8>>,
        ttl: Duration,
        policy: ReplayPolicy,
        replay: Arc<dyn TicketReplayStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            ttl,
            policy,
            replay,
            clock,
            telemetry: TicketTelemetry::default(),
        }
    }

    /// Configured ticket lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replay-store failure policy in effect.
    pub fn policy(&self) -> ReplayPolicy {
        self.policy
    }

    /// Telemetry snapshot for readiness and metrics.
    pub fn telemetry(&self) -> TicketTelemetrySnapshot {
        self.telemetry
            .snapshot(self.policy.as_str(), self.replay.mode())
    }

    fn mac(&self) -> Result<HmacSha256, TicketError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TicketError::Invalid)
    }

    /// Issue a ticket for an authenticated `(user, device)` pair.
    pub fn issue(&self, external_user_id: &str, device_id: &str) -> Result<IssuedTicket, Error> {
        let now = self.clock.now().timestamp();
        let ttl_secs = i64::try_from(self.ttl.as_secs()).unwrap_or(60);
        let claims = TicketClaims {
            sub: external_user_id.to_owned(),
            device_id: device_id.to_owned(),
            iat: now,
            exp: now + ttl_secs,
            jti: Uuid::new_v4().to_string(),
        };
        let header = TicketHeader {
            alg: "HS256".to_owned(),
            typ: TICKET_TYPE.to_owned(),
        };

        let header_b64 = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&header).map_err(|err| Error::internal(err.to_string()))?,
        );
        let claims_b64 = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&claims).map_err(|err| Error::internal(err.to_string()))?,
        );
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self
            .mac()
            .map_err(|_| Error::internal("ticket secret rejected by HMAC"))?;
        mac.update(signing_input.as_bytes());
        let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(IssuedTicket {
            token: format!("{signing_input}.{signature_b64}"),
            expires_at: claims.exp,
            ttl: self.ttl,
        })
    }

    /// Verify structure, signature, and expiry without consuming.
    fn verify(&self, token: &str) -> Result<TicketClaims, TicketError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TicketError::Invalid);
        };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| TicketError::Invalid)?;
        let header: TicketHeader =
            serde_json::from_slice(&header_bytes).map_err(|_| TicketError::Invalid)?;
        if header.alg != "HS256" || header.typ != TICKET_TYPE {
            return Err(TicketError::Invalid);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TicketError::Invalid)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        // Constant-time comparison.
        mac.verify_slice(&signature)
            .map_err(|_| TicketError::Invalid)?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| TicketError::Invalid)?;
        let claims: TicketClaims =
            serde_json::from_slice(&claims_bytes).map_err(|_| TicketError::Invalid)?;

        if claims.exp <= self.clock.now().timestamp() {
            return Err(TicketError::Expired);
        }
        Ok(claims)
    }

    /// Verify and consume a ticket, enforcing single-use.
    pub async fn consume(&self, token: &str) -> Result<TicketClaims, TicketError> {
        self.telemetry.attempts.fetch_add(1, Ordering::Relaxed);
        let claims = self.verify(token)?;

        let remaining_secs = claims.exp - self.clock.now().timestamp();
        let remaining = Duration::from_secs(u64::try_from(remaining_secs.max(1)).unwrap_or(1));

        match self.replay.try_consume(&claims.jti, remaining).await {
            Ok(ReplayOutcome::FirstUse) => {
                self.telemetry.mark_healthy();
                self.telemetry.successes.fetch_add(1, Ordering::Relaxed);
                Ok(claims)
            }
            Ok(ReplayOutcome::Replayed) => {
                self.telemetry.mark_healthy();
                self.telemetry
                    .replay_rejections
                    .fetch_add(1, Ordering::Relaxed);
                Err(TicketError::Replayed)
            }
            Err(ReplayStoreError::Unavailable { message }) => {
                self.telemetry.storage_errors.fetch_add(1, Ordering::Relaxed);
                self.telemetry.mark_degraded();
                warn!(%message, policy = self.policy.as_str(), "replay store unavailable");
                match self.policy {
                    ReplayPolicy::Strict => Err(TicketError::StorageUnavailable),
                    ReplayPolicy::BestEffort => {
                        self.telemetry
                            .fail_open_bypasses
                            .fetch_add(1, Ordering::Relaxed);
                        self.telemetry.successes.fetch_add(1, Ordering::Relaxed);
                        Ok(claims)
                    }
                }
            }
        }
    }
}
