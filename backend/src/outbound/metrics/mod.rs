//! Prometheus adapter for sync health metrics.
//!
//! Counters are incremented on the hot path through the `SyncMetrics` port.
//! Gauges describing current hub/ticket/replay state are set at scrape time
//! from the owning components' snapshots, so the registry never holds a
//! second copy of degradation state.

use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::domain::maintenance::MaintenanceSnapshot;
use crate::domain::ports::{PruneKind, PushOutcomeKind, SyncMetrics};
use crate::domain::ticket::TicketTelemetrySnapshot;
use crate::realtime::HubStatusSnapshot;

/// Prometheus-backed implementation of the `SyncMetrics` port, plus the
/// scrape-time gauges for hub, ticket, and maintenance state.
pub struct PrometheusSyncMetrics {
    registry: Registry,
    push_operations: IntCounterVec,
    write_failures: IntCounter,
    cursor_resets: IntCounter,
    pruned_rows: IntCounterVec,
    maintenance_cycles: IntCounterVec,
    readiness_failures: IntCounter,

    fallback_active: IntGauge,
    fallback_dwell_seconds: Gauge,
    fallback_dwell_seconds_total: Gauge,
    fallback_transitions: IntGauge,
    subscriber_ready: IntGauge,
    publisher_ready: IntGauge,

    replay_store_strict: IntGauge,
    ticket_attempts: IntGauge,
    ticket_successes: IntGauge,
    ticket_replay_rejections: IntGauge,
    ticket_fail_open_bypasses: IntGauge,
    ticket_storage_errors: IntGauge,

    maintenance_last_completed: IntGauge,
}

impl PrometheusSyncMetrics {
    /// Create the registry and register every instrument.
    ///
    /// # Errors
    ///
    /// Returns an error when an instrument cannot be registered (duplicate
    /// name within the registry).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let push_operations = IntCounterVec::new(
            Opts::new(
                "notesync_push_operations_total",
                "Push operations by outcome",
            ),
            &["outcome"],
        )?;
        let write_failures = IntCounter::new(
            "notesync_write_failures_total",
            "Commit attempts that failed with a storage error",
        )?;
        let cursor_resets = IntCounter::new(
            "notesync_cursor_resets_total",
            "Pulls rejected because the cursor predates retention",
        )?;
        let pruned_rows = IntCounterVec::new(
            Opts::new("notesync_pruned_rows_total", "Rows removed by maintenance"),
            &["kind"],
        )?;
        let maintenance_cycles = IntCounterVec::new(
            Opts::new(
                "notesync_maintenance_cycles_total",
                "Maintenance cycles by result",
            ),
            &["result"],
        )?;
        let readiness_failures = IntCounter::new(
            "notesync_readiness_check_failures_total",
            "Readiness probes that reported failure",
        )?;

        let fallback_active = IntGauge::new(
            "notesync_fallback_active",
            "1 while the realtime hub runs on the local fallback",
        )?;
        let fallback_dwell_seconds = Gauge::new(
            "notesync_fallback_dwell_seconds",
            "Seconds in the current degradation window",
        )?;
        let fallback_dwell_seconds_total = Gauge::new(
            "notesync_fallback_dwell_seconds_total",
            "Cumulative seconds spent degraded",
        )?;
        let fallback_transitions = IntGauge::new(
            "notesync_fallback_transitions",
            "Degradation transitions since start",
        )?;
        let subscriber_ready = IntGauge::new(
            "notesync_subscriber_ready",
            "1 while the pub/sub subscriber is connected",
        )?;
        let publisher_ready = IntGauge::new(
            "notesync_publisher_ready",
            "1 while the pub/sub publisher is healthy",
        )?;

        let replay_store_strict = IntGauge::new(
            "notesync_replay_store_strict",
            "1 under strict replay-store policy, 0 under best-effort",
        )?;
        let ticket_attempts = IntGauge::new(
            "notesync_ticket_attempts_total",
            "Stream ticket consumption attempts",
        )?;
        let ticket_successes = IntGauge::new(
            "notesync_ticket_successes_total",
            "Stream ticket consumptions accepted",
        )?;
        let ticket_replay_rejections = IntGauge::new(
            "notesync_ticket_replay_rejections_total",
            "Stream tickets rejected as replays",
        )?;
        let ticket_fail_open_bypasses = IntGauge::new(
            "notesync_ticket_fail_open_bypasses_total",
            "Tickets accepted while the replay store was down (best-effort)",
        )?;
        let ticket_storage_errors = IntGauge::new(
            "notesync_ticket_storage_errors_total",
            "Replay store failures during consumption",
        )?;

        let maintenance_last_completed = IntGauge::new(
            "notesync_maintenance_last_completed_timestamp_ms",
            "Millisecond epoch of the last completed maintenance cycle",
        )?;

        registry.register(Box::new(push_operations.clone()))?;
        registry.register(Box::new(write_failures.clone()))?;
        registry.register(Box::new(cursor_resets.clone()))?;
        registry.register(Box::new(pruned_rows.clone()))?;
        registry.register(Box::new(maintenance_cycles.clone()))?;
        registry.register(Box::new(readiness_failures.clone()))?;
        registry.register(Box::new(fallback_active.clone()))?;
        registry.register(Box::new(fallback_dwell_seconds.clone()))?;
        registry.register(Box::new(fallback_dwell_seconds_total.clone()))?;
        registry.register(Box::new(fallback_transitions.clone()))?;
        registry.register(Box::new(subscriber_ready.clone()))?;
        registry.register(Box::new(publisher_ready.clone()))?;
        registry.register(Box::new(replay_store_strict.clone()))?;
        registry.register(Box::new(ticket_attempts.clone()))?;
        registry.register(Box::new(ticket_successes.clone()))?;
        registry.register(Box::new(ticket_replay_rejections.clone()))?;
        registry.register(Box::new(ticket_fail_open_bypasses.clone()))?;
        registry.register(Box::new(ticket_storage_errors.clone()))?;
        registry.register(Box::new(maintenance_last_completed.clone()))?;

        Ok(Self {
            registry,
            push_operations,
            write_failures,
            cursor_resets,
            pruned_rows,
            maintenance_cycles,
            readiness_failures,
            fallback_active,
            fallback_dwell_seconds,
            fallback_dwell_seconds_total,
            fallback_transitions,
            subscriber_ready,
            publisher_ready,
            replay_store_strict,
            ticket_attempts,
            ticket_successes,
            ticket_replay_rejections,
            ticket_fail_open_bypasses,
            ticket_storage_errors,
            maintenance_last_completed,
        })
    }

    /// Record a failed readiness probe.
    pub fn record_readiness_failure(&self) {
        self.readiness_failures.inc();
    }

    /// Update scrape-time gauges and render the registry in text format.
    pub fn render(
        &self,
        hub: &HubStatusSnapshot,
        tickets: &TicketTelemetrySnapshot,
        maintenance: &MaintenanceSnapshot,
    ) -> Result<String, prometheus::Error> {
        self.fallback_active
            .set(i64::from(hub.mode == "local-fallback"));
        self.fallback_dwell_seconds
            .set(hub.degraded_for_ms as f64 / 1_000.0);
        self.fallback_dwell_seconds_total
            .set(hub.total_degraded_ms as f64 / 1_000.0);
        self.fallback_transitions
            .set(i64::try_from(hub.degraded_transitions).unwrap_or(i64::MAX));
        self.subscriber_ready.set(i64::from(hub.subscriber_ready));
        self.publisher_ready.set(i64::from(hub.publisher_ready));

        self.replay_store_strict
            .set(i64::from(tickets.mode == "strict"));
        self.ticket_attempts
            .set(i64::try_from(tickets.attempts).unwrap_or(i64::MAX));
        self.ticket_successes
            .set(i64::try_from(tickets.successes).unwrap_or(i64::MAX));
        self.ticket_replay_rejections
            .set(i64::try_from(tickets.replay_rejections).unwrap_or(i64::MAX));
        self.ticket_fail_open_bypasses
            .set(i64::try_from(tickets.fail_open_bypasses).unwrap_or(i64::MAX));
        self.ticket_storage_errors
            .set(i64::try_from(tickets.storage_errors).unwrap_or(i64::MAX));

        self.maintenance_last_completed
            .set(maintenance.last_completed_at);

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl SyncMetrics for PrometheusSyncMetrics {
    fn record_push_outcome(&self, outcome: PushOutcomeKind) {
        self.push_operations
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    fn record_write_failure(&self) {
        self.write_failures.inc();
    }

    fn record_cursor_reset(&self) {
        self.cursor_resets.inc();
    }

    fn record_pruned(&self, kind: PruneKind, rows: u64) {
        self.pruned_rows
            .with_label_values(&[kind.as_str()])
            .inc_by(rows);
    }

    fn record_maintenance_cycle(&self, failed: bool) {
        let result = if failed { "failed" } else { "ok" };
        self.maintenance_cycles.with_label_values(&[result]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn hub_snapshot() -> HubStatusSnapshot {
        HubStatusSnapshot {
            mode: "local-fallback",
            subscriber_ready: false,
            publisher_ready: false,
            degraded_reason: None,
            degraded_for_ms: 2_500,
            total_degraded_ms: 10_000,
            degraded_transitions: 3,
            last_error: None,
        }
    }

    fn ticket_snapshot() -> TicketTelemetrySnapshot {
        TicketTelemetrySnapshot {
            mode: "strict",
            backend: "memory",
            degraded: false,
            degraded_for_ms: 0,
            total_degraded_ms: 0,
            degraded_transitions: 0,
            attempts: 7,
            successes: 5,
            replay_rejections: 2,
            fail_open_bypasses: 0,
            storage_errors: 0,
        }
    }

    fn maintenance_snapshot() -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            cycles_run: 1,
            cycles_failed: 0,
            last_completed_at: 1_700_000_000_000,
            last_error: None,
            last_counts: None,
        }
    }

    #[rstest]
    fn render_includes_counters_and_gauges() {
        let metrics = PrometheusSyncMetrics::new().expect("registry");
        metrics.record_push_outcome(PushOutcomeKind::Applied);
        metrics.record_push_outcome(PushOutcomeKind::Conflict);
        metrics.record_cursor_reset();
        metrics.record_pruned(PruneKind::NoteChanges, 12);

        let rendered = metrics
            .render(&hub_snapshot(), &ticket_snapshot(), &maintenance_snapshot())
            .expect("render");

        assert!(rendered.contains("notesync_push_operations_total{outcome=\"applied\"} 1"));
        assert!(rendered.contains("notesync_cursor_resets_total 1"));
        assert!(rendered.contains("notesync_pruned_rows_total{kind=\"note_changes\"} 12"));
        assert!(rendered.contains("notesync_fallback_active 1"));
        assert!(rendered.contains("notesync_ticket_attempts_total 7"));
        assert!(rendered.contains("notesync_replay_store_strict 1"));
    }

    #[rstest]
    fn duplicate_registration_is_an_error() {
        let metrics = PrometheusSyncMetrics::new().expect("registry");
        let duplicate = IntCounter::new("notesync_cursor_resets_total", "dup").expect("counter");
        assert!(metrics.registry.register(Box::new(duplicate)).is_err());
    }
}
