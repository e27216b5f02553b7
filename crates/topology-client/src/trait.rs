//! TopologySource trait for mocking
//!
//! The IPAM service only needs the datacenter description, so this is the
//! whole surface. The HTTP client implements it and tests use
//! [`StaticTopology`](crate::StaticTopology).

use crate::error::TopologyError;
use crate::models::Datacenter;

/// Source of the datacenter layout
#[async_trait::async_trait]
pub trait TopologySource: Send + Sync {
    /// Fetch the current datacenter description
    async fn datacenter(&self) -> Result<Datacenter, TopologyError>;
}
