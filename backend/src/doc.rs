//! OpenAPI document assembled from the handler annotations.

use utoipa::OpenApi;

/// Public OpenAPI surface for tooling and client generation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "notesync",
        description = "Multi-device synchronization backend for personal notes"
    ),
    paths(
        crate::inbound::http::health::health,
        crate::inbound::http::health::ready,
        crate::inbound::http::health::metrics,
        crate::inbound::http::sync::push,
        crate::inbound::http::sync::pull,
        crate::inbound::http::notes::snapshot,
        crate::inbound::http::bootstrap::bootstrap,
        crate::inbound::http::devices::list_devices,
        crate::inbound::http::devices::revoke_device,
        crate::inbound::http::events::issue_ticket,
        crate::inbound::http::events::events,
    ),
    components(schemas(
        crate::domain::Note,
        crate::domain::NoteType,
        crate::domain::NotePriority,
        crate::domain::ChangeOp,
        crate::domain::Device,
        crate::domain::DeviceId,
        crate::domain::UserId,
        crate::domain::Error,
        crate::domain::ErrorCode,
        crate::domain::sync::PushOperation,
        crate::domain::sync::PushResponse,
        crate::domain::sync::AppliedOperation,
        crate::domain::sync::SyncConflict,
        crate::domain::sync::PullResponse,
        crate::domain::sync::PullChange,
        crate::domain::sync::SnapshotResponse,
        crate::domain::bootstrap::BootstrapResponse,
        crate::inbound::http::sync::PushRequest,
        crate::inbound::http::bootstrap::BootstrapRequest,
        crate::inbound::http::devices::DeviceListResponse,
        crate::inbound::http::devices::RevokeResponse,
        crate::inbound::http::events::TicketResponse,
        crate::inbound::http::health::DependencyStatus,
    )),
    tags(
        (name = "sync", description = "Push/pull change-log protocol"),
        (name = "devices", description = "Device session lifecycle"),
        (name = "events", description = "Real-time event stream"),
        (name = "health", description = "Liveness, readiness, metrics")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_includes_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/health",
            "/ready",
            "/metrics",
            "/api/v2/sync/push",
            "/api/v2/sync/pull",
            "/api/v2/notes",
            "/api/v2/sync/bootstrap",
            "/api/v2/devices",
            "/api/v2/devices/{id}/revoke",
            "/api/v2/events/ticket",
            "/api/v2/events",
        ] {
            assert!(
                paths.iter().any(|path| *path == expected),
                "missing path {expected}; have {paths:?}"
            );
        }
    }
}
