//! Endpoint IP Address Management
//!
//! Assigns, reuses, and releases IPv4 addresses for endpoints (VMs,
//! containers, pods) placed on hosts, partitioned by tenant and segment,
//! within a single datacenter CIDR.
//!
//! # Example
//!
//! ```no_run
//! use ipam::{AllocationRequest, DatacenterLayout, IpamService, LayoutSpec, SqliteEndpointStore, Triple};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let layout = DatacenterLayout::new(LayoutSpec {
//!     cidr: "10.0.0.0/8".parse()?,
//!     host_bits: 8,
//!     tenant_bits: 4,
//!     segment_bits: 4,
//!     endpoint_space_bits: 0,
//!     endpoint_bits: 8,
//! })?;
//! let store = SqliteEndpointStore::connect("sqlite://ipam.db?mode=rwc").await?;
//! let ipam = IpamService::new(Arc::new(store), layout);
//!
//! // 10.1.17.3: first endpoint of tenant 1, segment 1, host 1
//! let endpoint = ipam.allocate(&AllocationRequest::new(Triple::new(1, 1, 1))).await?;
//!
//! // Back into the pool; the next allocation for the triple reuses it
//! ipam.release(endpoint.address).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - **Address encoder**: pure offset arithmetic with overflow checks
//! - **Datacenter layout**: validated CIDR bit-field decomposition
//! - **Allocation store**: transactional, mutex-serialized endpoint table
//! - **IPAM service**: reclaim-or-mint allocation and release

pub mod encoder;
pub mod error;
pub mod layout;
pub mod models;
pub mod service;
pub mod sqlite;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

#[cfg(test)]
mod service_test;

pub use error::IpamError;
pub use layout::{DatacenterLayout, LayoutSpec};
pub use models::*;
pub use service::IpamService;
pub use sqlite::SqliteEndpointStore;
pub use store_trait::{EndpointStore, EndpointTransaction};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MemoryEndpointStore;
