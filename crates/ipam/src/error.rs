//! IPAM errors

use thiserror::Error;

/// Errors that can occur while allocating or releasing endpoint addresses
#[derive(Debug, Error)]
pub enum IpamError {
    /// No active record exists for the requested address
    #[error("Not found: {0}")]
    NotFound(String),

    /// An insert or update would violate the triple/network-id, address,
    /// or request-token uniqueness constraint
    #[error("Conflict: {0}")]
    ConflictViolation(String),

    /// Persisted state contradicts an invariant (e.g. two active records
    /// for one address). Indicates corruption, not a caller mistake.
    #[error("Consistency fault: {0}")]
    ConsistencyFault(String),

    /// Layout bit fields do not partition the address space, or an
    /// offset computation would overflow the endpoint region
    #[error("Configuration error: {0}")]
    ConfigurationFault(String),

    /// Invalid request (e.g. identifier wider than its layout field)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Underlying transaction or commit failure
    #[error("Store error: {0}")]
    StoreFault(#[source] sqlx::Error),
}

impl IpamError {
    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            IpamError::NotFound(_) => "not_found",
            IpamError::ConflictViolation(_) => "conflict",
            IpamError::ConsistencyFault(_) => "consistency_fault",
            IpamError::ConfigurationFault(_) => "configuration_fault",
            IpamError::InvalidRequest(_) => "invalid_request",
            IpamError::StoreFault(_) => "store_fault",
        }
    }
}

impl From<sqlx::Error> for IpamError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                IpamError::ConflictViolation(db_err.message().to_string())
            }
            _ => IpamError::StoreFault(err),
        }
    }
}
