//! Server construction and adapter wiring.
//!
//! Wiring follows the storage configuration: with `DATABASE_URL` the Diesel
//! adapters back every port; without it the in-memory engine serves
//! development and tests. Redis is optional the same way: absent, the hub
//! runs in local-fallback mode and the replay store is process-local.

mod config;

pub use config::{AppConfig, AppEnv, ConfigError};

use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::{Server, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{web, App, HttpServer};
use tracing::{info, warn};

use crate::domain::bootstrap::BootstrapService;
use crate::domain::gate::{DevAuthOverride, IdentityGate};
use crate::domain::maintenance::{
    run_maintenance_loop, MaintenanceHealth, MaintenanceService, RetentionPolicy,
};
use crate::domain::ports::{
    AlwaysHealthy, BootstrapRepository, ChangeLogRepository, Clock, DependencyPing,
    DeviceRepository, IdentityProvider, IdempotencyStore, MemoryReplayStore,
    RejectAllIdentityProvider, SystemClock, TicketReplayStore, UserDirectory,
};
use crate::domain::sync::{SyncLimits, SyncService};
use crate::domain::ticket::{ReplayPolicy, StreamTicketService};
use crate::domain::{Error, ExternalUserId};
use crate::inbound::http::health::ReadinessProbe;
use crate::inbound::http::state::{HttpState, HttpStatePorts};
use crate::inbound::http::{bootstrap, devices, events, health, notes, sync};
use crate::middleware::{DeviceEcho, RequestTrace};
use crate::outbound::identity::HttpIdentityProvider;
use crate::outbound::metrics::PrometheusSyncMetrics;
use crate::outbound::persistence::{
    DbPool, DieselBootstrapRepository, DieselChangeLog, DieselDeviceRepository,
    DieselIdempotencyStore, DieselUserDirectory, MemoryStore, PoolConfig,
};
use crate::outbound::redis::{
    connect_pool, spawn_subscriber_bridge, RedisFanoutChannel, RedisPing, RedisTicketReplayStore,
};
use crate::realtime::RealtimeHub;

/// TTL for stored idempotent responses.
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);

struct StoragePorts {
    change_log: Arc<dyn ChangeLogRepository>,
    idempotency: Arc<dyn IdempotencyStore>,
    users: Arc<dyn UserDirectory>,
    devices: Arc<dyn DeviceRepository>,
    bootstrap: Arc<dyn BootstrapRepository>,
    ping: Arc<dyn DependencyPing>,
}

async fn build_storage(
    config: &AppConfig,
    clock: &Arc<dyn Clock>,
) -> std::io::Result<StoragePorts> {
    match &config.database_url {
        Some(url) => {
            let pool = DbPool::new(
                PoolConfig::new(url.clone())
                    .with_max_size(config.pg_pool_max_size)
                    .with_min_idle(Some(config.pg_pool_min_idle)),
            )
            .await
            .map_err(|err| std::io::Error::other(err.to_string()))?;
            Ok(StoragePorts {
                change_log: Arc::new(DieselChangeLog::new(
                    pool.clone(),
                    Arc::clone(clock),
                    IDEMPOTENCY_TTL,
                )),
                idempotency: Arc::new(DieselIdempotencyStore::new(
                    pool.clone(),
                    Arc::clone(clock),
                )),
                users: Arc::new(DieselUserDirectory::new(pool.clone(), Arc::clone(clock))),
                devices: Arc::new(DieselDeviceRepository::new(pool.clone(), Arc::clone(clock))),
                bootstrap: Arc::new(DieselBootstrapRepository::new(pool.clone())),
                ping: Arc::new(pool),
            })
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory engine (state is not durable)");
            let store = Arc::new(MemoryStore::new(Arc::clone(clock)));
            Ok(StoragePorts {
                change_log: store.clone(),
                idempotency: store.clone(),
                users: store.clone(),
                devices: store.clone(),
                bootstrap: store,
                ping: Arc::new(AlwaysHealthy::new("memory")),
            })
        }
    }
}

struct RedisPorts {
    hub: Arc<RealtimeHub>,
    replay: Arc<dyn TicketReplayStore>,
    ping: Option<Arc<dyn DependencyPing>>,
}

async fn build_redis(config: &AppConfig, clock: &Arc<dyn Clock>) -> std::io::Result<RedisPorts> {
    match &config.redis_url {
        Some(url) => {
            let pool = connect_pool(url)
                .await
                .map_err(std::io::Error::other)?;
            let hub = Arc::new(RealtimeHub::with_distributed(
                Arc::new(RedisFanoutChannel::new(pool.clone())),
                Arc::clone(clock),
            ));
            spawn_subscriber_bridge(url.clone(), Arc::clone(&hub));
            Ok(RedisPorts {
                hub,
                replay: Arc::new(RedisTicketReplayStore::new(pool.clone())),
                ping: Some(Arc::new(RedisPing(pool))),
            })
        }
        None => {
            warn!("REDIS_URL not set; realtime fan-out is process-local only");
            Ok(RedisPorts {
                hub: Arc::new(RealtimeHub::local_only(Arc::clone(clock))),
                replay: Arc::new(MemoryReplayStore::new()),
                ping: None,
            })
        }
    }
}

fn build_identity_provider(config: &AppConfig) -> std::io::Result<Arc<dyn IdentityProvider>> {
    match (
        &config.identity_provider_url,
        &config.identity_provider_secret_key,
    ) {
        (Some(url), Some(key)) => Ok(Arc::new(
            HttpIdentityProvider::new(url, key.clone())
                .map_err(|err| std::io::Error::other(err.to_string()))?,
        )),
        _ => {
            warn!("identity provider not configured; all bearer credentials will be rejected");
            Ok(Arc::new(RejectAllIdentityProvider))
        }
    }
}

fn dev_override(config: &AppConfig) -> Option<DevAuthOverride> {
    if config.env.is_production() || !config.allow_insecure_dev_auth {
        return None;
    }
    warn!("insecure development auth override is enabled");
    Some(DevAuthOverride {
        default_user: config
            .auth_dev_user_id
            .as_deref()
            .and_then(|raw| ExternalUserId::new(raw).ok()),
    })
}

/// Build the shared HTTP state and spawn the background loops.
pub async fn build_state(config: &AppConfig) -> std::io::Result<web::Data<HttpState>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(
        PrometheusSyncMetrics::new().map_err(|err| std::io::Error::other(err.to_string()))?,
    );

    let storage = build_storage(config, &clock).await?;
    let redis = build_redis(config, &clock).await?;

    let sync_service = Arc::new(SyncService::new(
        Arc::clone(&storage.change_log),
        Arc::clone(&storage.idempotency),
        redis.hub.clone(),
        metrics.clone(),
        SyncLimits {
            batch_limit: config.sync_batch_limit,
            pull_limit: config.sync_pull_limit,
        },
    ));
    let bootstrap_service = Arc::new(BootstrapService::new(
        Arc::clone(&storage.change_log),
        Arc::clone(&storage.bootstrap),
        redis.hub.clone(),
        Arc::clone(&clock),
    ));

    let replay_policy = if config.env.is_production() {
        ReplayPolicy::Strict
    } else {
        ReplayPolicy::BestEffort
    };
    let tickets = Arc::new(StreamTicketService::new(
        config.stream_ticket_secret.as_bytes().to_vec(),
        config.stream_ticket_ttl,
        replay_policy,
        Arc::clone(&redis.replay),
        Arc::clone(&clock),
    ));

    let gate = Arc::new(IdentityGate::new(
        build_identity_provider(config)?,
        Arc::clone(&storage.users),
        Arc::clone(&storage.devices),
        dev_override(config),
    ));

    let maintenance_health = Arc::new(MaintenanceHealth::default());
    let maintenance = Arc::new(MaintenanceService::new(
        Arc::clone(&storage.change_log),
        Arc::clone(&storage.idempotency),
        Arc::clone(&clock),
        metrics.clone(),
        RetentionPolicy {
            tombstone_retention: config.tombstone_retention,
            note_changes_retention: config.note_changes_retention,
        },
        Arc::clone(&maintenance_health),
    ));
    tokio::spawn(run_maintenance_loop(
        maintenance,
        config.maintenance_interval,
    ));

    let readiness = Arc::new(ReadinessProbe::new(
        storage.ping,
        redis.ping,
        config.require_redis_for_ready,
    ));

    Ok(web::Data::new(HttpState::new(HttpStatePorts {
        gate,
        sync: sync_service,
        bootstrap: bootstrap_service,
        devices: storage.devices,
        tickets,
        hub: redis.hub,
        clock,
        metrics,
        maintenance: maintenance_health,
        readiness,
    })))
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(2 * 1024 * 1024)
        .error_handler(|err, _req| Error::bad_request(err.to_string()).into())
}

/// Assemble the application with every route and middleware.
pub fn build_app(
    state: web::Data<HttpState>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let api = web::scope("/api/v2")
        .service(sync::push)
        .service(sync::pull)
        .service(notes::snapshot)
        .service(bootstrap::bootstrap)
        .service(devices::list_devices)
        .service(devices::revoke_device)
        .service(events::issue_ticket)
        .service(events::events);

    App::new()
        .app_data(state)
        .app_data(json_config())
        .wrap(DeviceEcho)
        .wrap(RequestTrace)
        .service(api)
        .service(health::health)
        .service(health::ready)
        .service(health::metrics)
}

/// Construct the HTTP server.
///
/// # Errors
///
/// Propagates adapter construction failures and socket binding errors as
/// [`std::io::Error`].
pub async fn create_server(config: AppConfig) -> std::io::Result<Server> {
    let bind_addr = (config.host.clone(), config.port);
    let state = build_state(&config).await?;

    info!(host = %bind_addr.0, port = bind_addr.1, "starting sync backend");
    let server = HttpServer::new(move || build_app(state.clone()))
        .bind(bind_addr)?
        .run();
    Ok(server)
}
