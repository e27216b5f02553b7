//! Topology client errors

use thiserror::Error;

/// Errors that can occur when talking to the topology service
#[derive(Debug, Error)]
pub enum TopologyError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Topology service returned an error
    #[error("Topology API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The published datacenter description is incomplete or contradictory
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),
}
