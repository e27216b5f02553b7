//! IPAM Service
//!
//! Allocates, reuses, and releases endpoint IPv4 addresses within the
//! datacenter CIDR, over JSON/HTTP:
//! - Resolves the datacenter layout from the topology service or a file
//! - Keeps endpoint records in SQLite
//! - Serves allocate, release, and lookup requests

mod config;
mod error;
mod handlers;
mod server;


use crate::config::Config;
use crate::error::ServiceError;
use ipam::{IpamService, SqliteEndpointStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting IPAM Service");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Database: {}", config.database_url);
    info!("  Layout source: {:?}", config.layout_source);

    // Refuse to start on an invalid layout
    let layout = config::load_layout(&config.layout_source).await?;

    let store = SqliteEndpointStore::connect(&config.database_url).await?;
    let service = IpamService::new(Arc::new(store), layout);

    let router = server::create_router(server::AppState::new(service));
    server::serve(config.listen_addr, router).await
}
