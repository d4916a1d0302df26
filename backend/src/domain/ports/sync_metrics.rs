//! Port abstraction for sync health counters.
//!
//! The service layer records outcomes through this trait; the Prometheus
//! adapter exports them on `/metrics`. Recording is synchronous and
//! infallible so the hot path never blocks on observability.

/// Outcome classification for one push operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcomeKind {
    /// Committed and assigned a cursor.
    Applied,
    /// Rejected with a conflict report.
    Conflict,
    /// Replayed from the idempotency store.
    Replayed,
}

impl PushOutcomeKind {
    /// Label value used by metrics backends.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Conflict => "conflict",
            Self::Replayed => "replayed",
        }
    }
}

/// Row class removed by a maintenance prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneKind {
    /// Tombstoned notes past retention.
    Tombstones,
    /// Change-log rows past retention.
    NoteChanges,
    /// Expired idempotency entries.
    Idempotency,
}

impl PruneKind {
    /// Label value used by metrics backends.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tombstones => "tombstones",
            Self::NoteChanges => "note_changes",
            Self::Idempotency => "idempotency",
        }
    }
}

/// Port for recording sync protocol outcomes.
#[cfg_attr(test, mockall::automock)]
pub trait SyncMetrics: Send + Sync {
    /// Record the outcome of one push operation.
    fn record_push_outcome(&self, outcome: PushOutcomeKind);

    /// Record a commit attempt that failed with a storage error.
    fn record_write_failure(&self);

    /// Record a pull that required a cursor reset.
    fn record_cursor_reset(&self);

    /// Record rows removed by one maintenance prune step.
    fn record_pruned(&self, kind: PruneKind, rows: u64);

    /// Record completion of one maintenance cycle.
    fn record_maintenance_cycle(&self, failed: bool);
}

/// Metrics sink that discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSyncMetrics;

impl SyncMetrics for NoOpSyncMetrics {
    fn record_push_outcome(&self, _outcome: PushOutcomeKind) {}
    fn record_write_failure(&self) {}
    fn record_cursor_reset(&self) {}
    fn record_pruned(&self, _kind: PruneKind, _rows: u64) {}
    fn record_maintenance_cycle(&self, _failed: bool) {}
}
