//! HTTP handlers
//!
//! Thin translation between JSON/HTTP and [`IpamService`](ipam::IpamService)
//! calls. Extractor rejections are turned into [`ServiceError`] so every
//! failure carries the same JSON error body.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use ipam::{AllocationRequest, AllocationSource, EndpointRecord, LayoutSpec, Triple};
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::ServiceError;
use crate::server::AppState;

/// Active layout as reported by `GET /layout`
#[derive(Debug, Serialize)]
pub struct LayoutResponse {
    #[serde(flatten)]
    pub spec: LayoutSpec,
    pub endpoint_width: u8,
}

/// `POST /endpoints`
///
/// 201 when an address was reclaimed or minted, 200 when the request token
/// replayed an existing allocation.
pub async fn allocate_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<AllocationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EndpointRecord>), ServiceError> {
    let Json(request) = payload.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    debug!("Allocation request for {}", request.triple());

    let (record, source) = state.service.allocate_with_source(&request).await?;
    let status = match source {
        AllocationSource::Replayed => StatusCode::OK,
        AllocationSource::Reclaimed | AllocationSource::Minted => StatusCode::CREATED,
    };
    Ok((status, Json(record)))
}

/// `DELETE /endpoints/{address}`
pub async fn release_endpoint(
    State(state): State<AppState>,
    address: Result<Path<String>, PathRejection>,
) -> Result<Json<EndpointRecord>, ServiceError> {
    let address = parse_address(address)?;
    let record = state.service.release(address).await?;
    Ok(Json(record))
}

/// `GET /endpoints/{address}`
pub async fn get_endpoint(
    State(state): State<AppState>,
    address: Result<Path<String>, PathRejection>,
) -> Result<Json<EndpointRecord>, ServiceError> {
    let address = parse_address(address)?;
    let record = state.service.lookup(address).await?;
    Ok(Json(record))
}

/// `GET /tenants/{tenant}/segments/{segment}/hosts/{host}/endpoints`
pub async fn list_endpoints(
    State(state): State<AppState>,
    ids: Result<Path<(u64, u64, u64)>, PathRejection>,
) -> Result<Json<Vec<EndpointRecord>>, ServiceError> {
    let Path((tenant, segment, host)) =
        ids.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    let records = state
        .service
        .endpoints(&Triple::new(tenant, segment, host))
        .await?;
    Ok(Json(records))
}

/// `GET /layout`
pub async fn get_layout(State(state): State<AppState>) -> Json<LayoutResponse> {
    let layout = state.service.layout();
    Json(LayoutResponse {
        spec: layout.spec().clone(),
        endpoint_width: layout.endpoint_width(),
    })
}

/// `GET /healthz`
pub async fn health_check() -> &'static str {
    "ok"
}

fn parse_address(path: Result<Path<String>, PathRejection>) -> Result<Ipv4Addr, ServiceError> {
    let Path(raw) = path.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    raw.parse()
        .map_err(|e| ServiceError::InvalidRequest(format!("{:?} is not an IPv4 address: {}", raw, e)))
}
