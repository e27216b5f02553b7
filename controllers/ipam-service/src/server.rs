//! HTTP server
//!
//! Routes:
//!
//! - `POST /endpoints`
//! - `GET /endpoints/{address}`
//! - `DELETE /endpoints/{address}`
//! - `GET /tenants/{tenant}/segments/{segment}/hosts/{host}/endpoints`
//! - `GET /layout`
//! - `GET /healthz`

use axum::Router;
use axum::routing::{get, post};
use ipam::IpamService;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ServiceError;
use crate::handlers;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<IpamService>,
}

impl AppState {
    pub fn new(service: IpamService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/endpoints", post(handlers::allocate_endpoint))
        .route(
            "/endpoints/{address}",
            get(handlers::get_endpoint).delete(handlers::release_endpoint),
        )
        .route(
            "/tenants/{tenant}/segments/{segment}/hosts/{host}/endpoints",
            get(handlers::list_endpoints),
        )
        .route("/layout", get(handlers::get_layout))
        .route("/healthz", get(handlers::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on `addr` until the process is stopped
pub async fn serve(addr: SocketAddr, router: Router) -> Result<(), ServiceError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
