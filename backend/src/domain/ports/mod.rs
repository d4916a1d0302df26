//! Domain ports: the traits adapters implement.
//!
//! Services depend on these traits only; concrete implementations live under
//! `outbound/` (and `realtime/` for the event hub). Each port ships a small
//! error enum built with [`macros::define_port_error`] and, where useful, a
//! functional in-process implementation for development and tests.

mod bootstrap_repository;
mod change_log;
mod clock;
mod device_repository;
mod event_publisher;
mod identity_provider;
mod idempotency_store;
pub(crate) mod macros;
mod probe;
mod replay_store;
mod sync_metrics;
mod user_directory;

pub use bootstrap_repository::{
    BootstrapRecord, BootstrapRepository, BootstrapRepositoryError,
};
pub use change_log::{ChangeLogError, ChangeLogRepository};
pub use clock::{Clock, ManualClock, SystemClock};
pub use device_repository::{DeviceRepository, DeviceRepositoryError};
pub use event_publisher::{NoOpSyncEventPublisher, SyncEventPublisher};
pub use identity_provider::{
    IdentityProvider, IdentityProviderError, RejectAllIdentityProvider, StaticIdentityProvider,
};
pub use idempotency_store::{IdempotencyError, IdempotencyStore};
pub use probe::{AlwaysHealthy, DependencyPing};
pub use replay_store::{
    MemoryReplayStore, ReplayOutcome, ReplayStoreError, TicketReplayStore,
};
pub use sync_metrics::{NoOpSyncMetrics, PruneKind, PushOutcomeKind, SyncMetrics};
pub use user_directory::{UserDirectory, UserDirectoryError};

#[cfg(test)]
pub use bootstrap_repository::MockBootstrapRepository;
#[cfg(test)]
pub use change_log::MockChangeLogRepository;
#[cfg(test)]
pub use device_repository::MockDeviceRepository;
#[cfg(test)]
pub use event_publisher::MockSyncEventPublisher;
#[cfg(test)]
pub use identity_provider::MockIdentityProvider;
#[cfg(test)]
pub use idempotency_store::MockIdempotencyStore;
#[cfg(test)]
pub use replay_store::MockTicketReplayStore;
#[cfg(test)]
pub use sync_metrics::MockSyncMetrics;
#[cfg(test)]
pub use user_directory::MockUserDirectory;
