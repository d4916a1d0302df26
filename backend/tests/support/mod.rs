//! Shared harness for HTTP-level integration tests.
//!
//! Wires the full application against the in-memory engine with the dev
//! auth override enabled, so tests authenticate by sending an
//! `x-dev-user-id` header per request.
#![allow(dead_code)] // each test binary uses a different slice of the harness

use std::sync::Arc;
use std::time::Duration;

use actix_web::web;
use uuid::Uuid;

use notesync::domain::bootstrap::BootstrapService;
use notesync::domain::gate::{DevAuthOverride, IdentityGate};
use notesync::domain::maintenance::MaintenanceHealth;
use notesync::domain::ports::{
    AlwaysHealthy, Clock, ManualClock, MemoryReplayStore, RejectAllIdentityProvider,
};
use notesync::domain::sync::{SyncLimits, SyncService};
use notesync::domain::ticket::{ReplayPolicy, StreamTicketService};
use notesync::inbound::http::health::ReadinessProbe;
use notesync::inbound::http::state::{HttpState, HttpStatePorts};
use notesync::outbound::metrics::PrometheusSyncMetrics;
use notesync::outbound::persistence::MemoryStore;
use notesync::realtime::RealtimeHub;

/// Fixed device id used by most requests.
pub const DEVICE_ID: &str = "6b7a4a4e-9d30-4c96-8f4e-0f6f2f6f2f6f";

pub struct TestHarness {
    pub state: web::Data<HttpState>,
    pub store: Arc<MemoryStore>,
    pub hub: Arc<RealtimeHub>,
    pub clock: ManualClock,
}

pub fn harness() -> TestHarness {
    let manual_clock = ManualClock::at_ms(1_700_000_000_000);
    let clock: Arc<dyn Clock> = Arc::new(manual_clock.clone());

    let metrics = Arc::new(PrometheusSyncMetrics::new().expect("metrics registry"));
    let store = Arc::new(MemoryStore::new(Arc::clone(&clock)));
    let hub = Arc::new(RealtimeHub::local_only(Arc::clone(&clock)));

    let sync = Arc::new(SyncService::new(
        store.clone(),
        store.clone(),
        hub.clone(),
        metrics.clone(),
        SyncLimits::default(),
    ));
    let bootstrap = Arc::new(BootstrapService::new(
        store.clone(),
        store.clone(),
        hub.clone(),
        Arc::clone(&clock),
    ));
    let tickets = Arc::new(StreamTicketService::new(
        b"integration-test-secret".to_vec(),
        Duration::from_secs(60),
        ReplayPolicy::Strict,
        Arc::new(MemoryReplayStore::new()),
        Arc::clone(&clock),
    ));
    let gate = Arc::new(IdentityGate::new(
        Arc::new(RejectAllIdentityProvider),
        store.clone(),
        store.clone(),
        Some(DevAuthOverride { default_user: None }),
    ));
    let readiness = Arc::new(ReadinessProbe::new(
        Arc::new(AlwaysHealthy::new("memory")),
        None,
        false,
    ));

    let state = web::Data::new(HttpState::new(HttpStatePorts {
        gate,
        sync,
        bootstrap,
        devices: store.clone(),
        tickets,
        hub: hub.clone(),
        clock,
        metrics,
        maintenance: Arc::new(MaintenanceHealth::default()),
        readiness,
    }));

    TestHarness {
        state,
        store,
        hub,
        clock: manual_clock,
    }
}

/// A fresh random device id header value.
pub fn random_device_id() -> String {
    Uuid::new_v4().to_string()
}
