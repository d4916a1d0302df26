#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), forbid(clippy::expect_used))]
//! Backend entry-point: wires configuration, adapters, and the HTTP server.

use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use notesync::server::{create_server, AppConfig};

fn init_tracing() {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(EnvFilter::from_default_env);
    if let Err(error) = fmt().with_env_filter(filter).json().try_init() {
        warn!(%error, "tracing init failed");
    }
}

/// Application bootstrap.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_tracing();

    let config =
        AppConfig::from_env().map_err(|err| std::io::Error::other(err.to_string()))?;
    let server = create_server(config).await?;
    server.await
}
