//! Shared HTTP adapter state.
//!
//! HTTP handlers accept this state via `actix_web::web::Data` so they depend
//! on domain services and ports, not on concrete storage backends.

use std::sync::Arc;

use crate::domain::bootstrap::BootstrapService;
use crate::domain::gate::IdentityGate;
use crate::domain::maintenance::MaintenanceHealth;
use crate::domain::ports::{Clock, DeviceRepository};
use crate::domain::sync::SyncService;
use crate::domain::ticket::StreamTicketService;
use crate::outbound::metrics::PrometheusSyncMetrics;
use crate::realtime::RealtimeHub;

use super::health::ReadinessProbe;

/// Parameter object bundling everything HTTP handlers need.
#[derive(Clone)]
pub struct HttpStatePorts {
    pub gate: Arc<IdentityGate>,
    pub sync: Arc<SyncService>,
    pub bootstrap: Arc<BootstrapService>,
    pub devices: Arc<dyn DeviceRepository>,
    pub tickets: Arc<StreamTicketService>,
    pub hub: Arc<RealtimeHub>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<PrometheusSyncMetrics>,
    pub maintenance: Arc<MaintenanceHealth>,
    pub readiness: Arc<ReadinessProbe>,
}

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub gate: Arc<IdentityGate>,
    pub sync: Arc<SyncService>,
    pub bootstrap: Arc<BootstrapService>,
    pub devices: Arc<dyn DeviceRepository>,
    pub tickets: Arc<StreamTicketService>,
    pub hub: Arc<RealtimeHub>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<PrometheusSyncMetrics>,
    pub maintenance: Arc<MaintenanceHealth>,
    pub readiness: Arc<ReadinessProbe>,
}

impl From<HttpStatePorts> for HttpState {
    fn from(ports: HttpStatePorts) -> Self {
        let HttpStatePorts {
            gate,
            sync,
            bootstrap,
            devices,
            tickets,
            hub,
            clock,
            metrics,
            maintenance,
            readiness,
        } = ports;
        Self {
            gate,
            sync,
            bootstrap,
            devices,
            tickets,
            hub,
            clock,
            metrics,
            maintenance,
            readiness,
        }
    }
}

impl HttpState {
    /// Construct state from a ports bundle.
    pub fn new(ports: HttpStatePorts) -> Self {
        ports.into()
    }
}
