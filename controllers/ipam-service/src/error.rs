//! Service-specific error types.
//!
//! Wraps the library errors and adds the failures that only happen in the
//! binary: configuration, layout loading, and malformed HTTP input. Every
//! variant maps onto an HTTP status and a JSON body of the form
//! `{ "error": kind, "message": text }`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ipam::IpamError;
use serde::Serialize;
use thiserror::Error;
use topology_client::TopologyError;
use tracing::error;

/// Errors that can occur in the IPAM service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Allocation engine error
    #[error(transparent)]
    Ipam(#[from] IpamError),

    /// Topology service error
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed request (e.g., an unparseable address in the path)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Layout file could not be parsed
    #[error("Layout file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error (layout file, listener)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ServiceError {
    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Ipam(e) => e.kind(),
            ServiceError::Topology(_) => "topology_fault",
            ServiceError::InvalidConfig(_) | ServiceError::Yaml(_) => "configuration_fault",
            ServiceError::InvalidRequest(_) => "invalid_request",
            ServiceError::Io(_) => "io_fault",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Ipam(IpamError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::Ipam(IpamError::ConflictViolation(_)) => StatusCode::CONFLICT,
            ServiceError::Ipam(IpamError::InvalidRequest(_)) | ServiceError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Ipam(
                IpamError::ConsistencyFault(_)
                | IpamError::ConfigurationFault(_)
                | IpamError::StoreFault(_),
            ) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Topology(_) => StatusCode::BAD_GATEWAY,
            ServiceError::InvalidConfig(_) | ServiceError::Yaml(_) | ServiceError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
