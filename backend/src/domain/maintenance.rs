//! Background retention maintenance.
//!
//! One process-wide loop prunes aged tombstones, aged change-log rows, and
//! expired idempotency entries. Cycles are single-flight within an instance;
//! across instances the deletes are idempotent so overlap is harmless.
//! Retention must exceed the longest expected client offline window, since
//! pruning the change log forces stale cursors into a reset.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info};

use super::ports::{
    ChangeLogRepository, Clock, IdempotencyStore, PruneKind, SyncMetrics,
};

/// Retention cutoffs for the maintenance loop.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Tombstones older than this are deleted outright.
    pub tombstone_retention: Duration,
    /// Change rows older than this are deleted.
    pub note_changes_retention: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            tombstone_retention: Duration::from_secs(30 * 24 * 3600),
            note_changes_retention: Duration::from_secs(45 * 24 * 3600),
        }
    }
}

/// Row counts removed by one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceCounts {
    pub tombstones_pruned: u64,
    pub note_changes_pruned: u64,
    pub idempotency_pruned: u64,
}

/// Shared health record for the maintenance loop.
#[derive(Debug, Default)]
pub struct MaintenanceHealth {
    in_flight: AtomicBool,
    cycles_run: AtomicU64,
    cycles_failed: AtomicU64,
    last_completed_ms: AtomicI64,
    last_error: Mutex<Option<String>>,
    last_counts: Mutex<Option<MaintenanceCounts>>,
}

/// Serializable view of [`MaintenanceHealth`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSnapshot {
    pub cycles_run: u64,
    pub cycles_failed: u64,
    /// Millisecond epoch of the last successful cycle (0 before the first).
    pub last_completed_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_counts: Option<MaintenanceCounts>,
}

impl MaintenanceHealth {
    /// Current health snapshot.
    pub fn snapshot(&self) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            last_completed_at: self.last_completed_ms.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone(),
            last_counts: *self
                .last_counts
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        }
    }
}

/// Retention maintenance use-case.
pub struct MaintenanceService {
    change_log: Arc<dyn ChangeLogRepository>,
    idempotency: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn SyncMetrics>,
    policy: RetentionPolicy,
    health: Arc<MaintenanceHealth>,
}

impl MaintenanceService {
    /// Wire the service to its ports.
    pub fn new(
        change_log: Arc<dyn ChangeLogRepository>,
        idempotency: Arc<dyn IdempotencyStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn SyncMetrics>,
        policy: RetentionPolicy,
        health: Arc<MaintenanceHealth>,
    ) -> Self {
        Self {
            change_log,
            idempotency,
            clock,
            metrics,
            policy,
            health,
        }
    }

    /// Shared health record.
    pub fn health(&self) -> Arc<MaintenanceHealth> {
        Arc::clone(&self.health)
    }

    /// Run one maintenance cycle unless one is already in flight.
    ///
    /// Returns `None` when skipped by the single-flight guard.
    pub async fn run_cycle(&self) -> Option<Result<MaintenanceCounts, String>> {
        if self
            .health
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("maintenance cycle already in flight; skipping");
            return None;
        }
        let result = self.prune_all().await;
        self.record(&result);
        self.health.in_flight.store(false, Ordering::Release);
        Some(result)
    }

    async fn prune_all(&self) -> Result<MaintenanceCounts, String> {
        let now = self.clock.now();
        let now_ms = self.clock.now_ms();

        let tombstone_cutoff_ms = now_ms
            - i64::try_from(self.policy.tombstone_retention.as_millis()).unwrap_or(i64::MAX);
        let change_cutoff = now
            - chrono::Duration::from_std(self.policy.note_changes_retention)
                .unwrap_or_else(|_| chrono::Duration::days(45));

        let tombstones = self
            .change_log
            .prune_tombstones(tombstone_cutoff_ms)
            .await
            .map_err(|err| err.to_string())?;
        let changes = self
            .change_log
            .prune_changes(change_cutoff)
            .await
            .map_err(|err| err.to_string())?;
        let idempotency = self
            .idempotency
            .cleanup_expired()
            .await
            .map_err(|err| err.to_string())?;

        Ok(MaintenanceCounts {
            tombstones_pruned: tombstones,
            note_changes_pruned: changes,
            idempotency_pruned: idempotency,
        })
    }

    fn record(&self, result: &Result<MaintenanceCounts, String>) {
        self.health.cycles_run.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(counts) => {
                self.metrics
                    .record_pruned(PruneKind::Tombstones, counts.tombstones_pruned);
                self.metrics
                    .record_pruned(PruneKind::NoteChanges, counts.note_changes_pruned);
                self.metrics
                    .record_pruned(PruneKind::Idempotency, counts.idempotency_pruned);
                self.metrics.record_maintenance_cycle(false);
                self.health
                    .last_completed_ms
                    .store(self.clock.now_ms(), Ordering::Relaxed);
                *self
                    .health
                    .last_counts
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(*counts);
                *self
                    .health
                    .last_error
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
                info!(
                    tombstones = counts.tombstones_pruned,
                    changes = counts.note_changes_pruned,
                    idempotency = counts.idempotency_pruned,
                    "maintenance cycle completed"
                );
            }
            Err(message) => {
                self.metrics.record_maintenance_cycle(true);
                self.health.cycles_failed.fetch_add(1, Ordering::Relaxed);
                *self
                    .health
                    .last_error
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(message.clone());
                error!(%message, "maintenance cycle failed");
            }
        }
    }
}

/// Drive the maintenance loop: one cycle at startup, then every `interval`
/// with a small random jitter so instances do not stampede the database.
pub async fn run_maintenance_loop(service: Arc<MaintenanceService>, interval: Duration) {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    let mut rng = SmallRng::seed_from_u64(Utc::now().timestamp_millis() as u64);
    service.run_cycle().await;
    loop {
        let jitter_ms = rng.gen_range(0..=interval.as_millis().min(10_000) as u64);
        tokio::time::sleep(interval + Duration::from_millis(jitter_ms)).await;
        service.run_cycle().await;
    }
}
