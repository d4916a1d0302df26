//! Health, readiness, and metrics endpoints.
//!
//! `/health` is pure liveness and always succeeds. `/ready` aggregates
//! dependency state and gates load-balancer membership: the database must
//! answer, and under strict-redis mode the shared pub/sub must too. The
//! body carries the full dependency descriptor either way so operators see
//! degradation before it becomes an outage.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{get, web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::domain::ports::DependencyPing;
use crate::domain::Error;

use super::state::HttpState;
use super::ApiResult;

/// Bound on each dependency probe.
const PROBE_TIMEOUT: Duration = Duration::from_millis(1_500);

/// Status of one probed dependency.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencyStatus {
    pub name: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated probe outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessOutcome {
    pub ready: bool,
    pub database: DependencyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pub_sub: Option<DependencyStatus>,
}

/// Dependency prober backing `/ready`.
pub struct ReadinessProbe {
    database: Arc<dyn DependencyPing>,
    pub_sub: Option<Arc<dyn DependencyPing>>,
    require_redis_for_ready: bool,
    probe_timeout: Duration,
}

impl ReadinessProbe {
    /// Wire the probe to its dependencies.
    pub fn new(
        database: Arc<dyn DependencyPing>,
        pub_sub: Option<Arc<dyn DependencyPing>>,
        require_redis_for_ready: bool,
    ) -> Self {
        Self {
            database,
            pub_sub,
            require_redis_for_ready,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    async fn probe(&self, dependency: &Arc<dyn DependencyPing>) -> DependencyStatus {
        let name = dependency.name();
        match tokio::time::timeout(self.probe_timeout, dependency.ping()).await {
            Ok(Ok(())) => DependencyStatus {
                name,
                ok: true,
                error: None,
            },
            Ok(Err(message)) => DependencyStatus {
                name,
                ok: false,
                error: Some(message),
            },
            Err(_) => DependencyStatus {
                name,
                ok: false,
                error: Some(format!(
                    "probe timed out after {} ms",
                    self.probe_timeout.as_millis()
                )),
            },
        }
    }

    /// Run all probes and aggregate the gate decision.
    pub async fn check(&self) -> ReadinessOutcome {
        let database = self.probe(&self.database).await;
        let pub_sub = match &self.pub_sub {
            Some(dependency) => Some(self.probe(dependency).await),
            None => None,
        };
        let pub_sub_ok = pub_sub.as_ref().is_none_or(|status| status.ok);
        let is_ready = database.ok && (!self.require_redis_for_ready || pub_sub_ok);
        ReadinessOutcome {
            ready: is_ready,
            database,
            pub_sub,
        }
    }
}

/// Liveness probe; succeeds while the process can serve requests at all.
#[utoipa::path(
    get,
    path = "/health",
    tags = ["health"],
    responses((status = 200, description = "Process is alive"))
)]
#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "ok": true }))
}

/// Readiness probe; aggregates dependency and degradation state.
#[utoipa::path(
    get,
    path = "/ready",
    tags = ["health"],
    responses(
        (status = 200, description = "Instance may receive traffic"),
        (status = 503, description = "A required dependency is unavailable")
    )
)]
#[get("/ready")]
pub async fn ready(state: web::Data<HttpState>) -> HttpResponse {
    let outcome = state.readiness.check().await;
    let hub = state.hub.status();
    let tickets = state.tickets.telemetry();
    let maintenance = state.maintenance.snapshot();

    let degraded = !outcome.ready
        || hub.mode == "local-fallback"
        || tickets.degraded
        || outcome.pub_sub.as_ref().is_some_and(|status| !status.ok);
    let status_label = if !outcome.ready {
        "unavailable"
    } else if degraded {
        "degraded"
    } else {
        "ok"
    };

    let body = json!({
        "ready": outcome.ready,
        "status": status_label,
        "database": outcome.database,
        "pubSub": outcome.pub_sub,
        "realtimeHub": hub,
        "replayStore": tickets,
        "maintenance": maintenance,
    });

    if outcome.ready {
        HttpResponse::Ok().json(body)
    } else {
        state.metrics.record_readiness_failure();
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// Prometheus text exposition.
#[utoipa::path(
    get,
    path = "/metrics",
    tags = ["health"],
    responses((status = 200, description = "Prometheus text format", content_type = "text/plain"))
)]
#[get("/metrics")]
pub async fn metrics(state: web::Data<HttpState>) -> ApiResult<HttpResponse> {
    let rendered = state
        .metrics
        .render(
            &state.hub.status(),
            &state.tickets.telemetry(),
            &state.maintenance.snapshot(),
        )
        .map_err(|err| Error::internal(err.to_string()))?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(rendered))
}
