//! Allocation store traits
//!
//! The IPAM service talks to persistence only through these traits. The
//! SQLite store implements them for production, and tests can use the
//! in-memory store (feature `test-util`).
//!
//! Every mutating call happens inside an [`EndpointTransaction`] obtained
//! from [`EndpointStore::begin`]. Beginning a transaction first acquires the
//! store-wide mutex, so no two transactions against the same store instance
//! are ever in flight together. The mutex is released when the transaction
//! is committed, rolled back, or dropped.

use std::net::Ipv4Addr;

use crate::error::IpamError;
use crate::models::{EndpointRecord, NewEndpoint, Triple};

/// A persistent table of endpoint records
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait EndpointStore: Send + Sync {
    /// Acquire the store-wide mutex and open a transaction
    async fn begin(&self) -> Result<Box<dyn EndpointTransaction>, IpamError>;

    /// The active record for `address`, if any
    async fn find_by_address(&self, address: Ipv4Addr) -> Result<Option<EndpointRecord>, IpamError>;

    /// Every record ever allocated under `triple`, ordered by network ID
    async fn list_endpoints(&self, triple: &Triple) -> Result<Vec<EndpointRecord>, IpamError>;
}

/// One atomic unit of work against an [`EndpointStore`]
///
/// Dropping a transaction without committing rolls it back.
#[async_trait::async_trait]
pub trait EndpointTransaction: Send {
    /// The live record holding `token`, if any
    async fn find_by_token(&mut self, token: &str) -> Result<Option<EndpointRecord>, IpamError>;

    /// Reactivate the released record with the smallest network ID under
    /// `triple`, handing it to the new holder (`name`, `token`).
    async fn reclaim(
        &mut self,
        triple: &Triple,
        name: &str,
        token: Option<&str>,
    ) -> Result<Option<EndpointRecord>, IpamError>;

    /// `1 + max(network_id)` over all records of `triple`, or 0 with no
    /// history. Fails with `ConfigurationFault` if existing records were
    /// encoded with a stride other than `stride`.
    async fn mint_next_network_id(&mut self, triple: &Triple, stride: u8) -> Result<u64, IpamError>;

    /// Insert a new, in-use record
    async fn persist(&mut self, endpoint: NewEndpoint) -> Result<EndpointRecord, IpamError>;

    /// Mark the active record for `address` released and return its state
    /// before release
    async fn release(&mut self, address: Ipv4Addr) -> Result<EndpointRecord, IpamError>;

    async fn commit(self: Box<Self>) -> Result<(), IpamError>;

    async fn rollback(self: Box<Self>) -> Result<(), IpamError>;
}
