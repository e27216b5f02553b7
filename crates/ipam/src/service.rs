//! IPAM service
//!
//! Orchestrates a single allocation or release end-to-end:
//!
//! 1. A request token that already holds a live address gets that address
//!    back unchanged.
//! 2. Otherwise the lowest released network ID of the triple is reclaimed,
//!    keeping the address it was originally encoded with.
//! 3. Otherwise a fresh network ID is minted, run through the encoder, and
//!    OR'd into the triple's address-space base.
//!
//! Each call runs in one store transaction. The transaction is committed
//! only on success; on any error it is rolled back before the error is
//! returned, so callers never see partial state.

use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::encoder;
use crate::error::IpamError;
use crate::layout::DatacenterLayout;
use crate::models::{AllocationRequest, AllocationSource, EndpointRecord, NewEndpoint, Triple};
use crate::store_trait::{EndpointStore, EndpointTransaction};

/// Allocates and releases endpoint addresses within one datacenter layout
#[derive(Clone)]
pub struct IpamService {
    store: Arc<dyn EndpointStore>,
    layout: DatacenterLayout,
}

impl std::fmt::Debug for IpamService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpamService")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl IpamService {
    /// Creates a new service over `store`.
    ///
    /// The layout is validated when it is built, so an invalid layout never
    /// reaches this point.
    pub fn new(store: Arc<dyn EndpointStore>, layout: DatacenterLayout) -> Self {
        info!("IPAM service using layout {}", layout);
        Self { store, layout }
    }

    pub fn layout(&self) -> &DatacenterLayout {
        &self.layout
    }

    /// Allocates an address for the request's (tenant, segment, host).
    ///
    /// Returns the committed endpoint record.
    pub async fn allocate(&self, request: &AllocationRequest) -> Result<EndpointRecord, IpamError> {
        self.allocate_with_source(request)
            .await
            .map(|(record, _)| record)
    }

    /// Like [`allocate`](Self::allocate), also reporting whether the address
    /// was replayed, reclaimed, or freshly minted.
    pub async fn allocate_with_source(
        &self,
        request: &AllocationRequest,
    ) -> Result<(EndpointRecord, AllocationSource), IpamError> {
        let triple = request.triple();

        // Fail fast on identifiers that do not fit, before taking the lock
        let base = self.layout.prefix_for(&triple)?;

        let mut tx = self.store.begin().await?;
        match self.allocate_in(tx.as_mut(), request, &triple, base).await {
            Ok((record, source)) => {
                tx.commit().await?;
                info!(
                    "Allocated {} (network ID {}, {:?}) to {}",
                    record.address, record.network_id, source, triple
                );
                Ok((record, source))
            }
            Err(e) => {
                warn!("Allocation for {} failed, rolling back: {}", triple, e);
                rollback(tx).await;
                Err(e)
            }
        }
    }

    async fn allocate_in(
        &self,
        tx: &mut dyn EndpointTransaction,
        request: &AllocationRequest,
        triple: &Triple,
        base: u32,
    ) -> Result<(EndpointRecord, AllocationSource), IpamError> {
        let token = request.request_token.as_deref();

        if let Some(token) = token {
            if let Some(existing) = tx.find_by_token(token).await? {
                if existing.triple() != *triple {
                    return Err(IpamError::ConflictViolation(format!(
                        "request token {} already holds {} for {}",
                        token,
                        existing.address,
                        existing.triple()
                    )));
                }
                info!(
                    "Request token {} already holds {} for {}, returning it",
                    token, existing.address, triple
                );
                return Ok((existing, AllocationSource::Replayed));
            }
        }

        // First, see if a formerly allocated address has been released
        if let Some(record) = tx.reclaim(triple, &request.name, token).await? {
            debug!(
                "Reclaimed {} (network ID {}) for {}",
                record.address, record.network_id, triple
            );
            return Ok((record, AllocationSource::Reclaimed));
        }

        let stride = self.layout.stride();
        let network_id = tx.mint_next_network_id(triple, stride).await?;
        debug!("New network ID for {} is {}", triple, network_id);

        let effective = encoder::effective_offset(network_id, stride, self.layout.endpoint_width())?;
        debug!(
            "Effective network ID for network ID {} (stride {}): {}",
            network_id, stride, effective
        );

        let offset = u32::try_from(effective).map_err(|_| {
            IpamError::ConfigurationFault(format!(
                "effective network ID {} does not fit in an IPv4 address",
                effective
            ))
        })?;
        let address = Ipv4Addr::from(base | offset);
        debug!("{} | {} = {}", Ipv4Addr::from(base), effective, address);

        let record = tx
            .persist(NewEndpoint {
                address,
                triple: *triple,
                network_id,
                stride,
                name: request.name.clone(),
                request_token: request.request_token.clone(),
            })
            .await?;
        Ok((record, AllocationSource::Minted))
    }

    /// Releases `address` back into the triple's reusable pool.
    ///
    /// Returns the record as it was before release.
    pub async fn release(&self, address: Ipv4Addr) -> Result<EndpointRecord, IpamError> {
        self.check_in_cidr(address)?;

        let mut tx = self.store.begin().await?;
        match tx.release(address).await {
            Ok(record) => {
                tx.commit().await?;
                info!(
                    "Released {} (network ID {}) from {}",
                    address,
                    record.network_id,
                    record.triple()
                );
                Ok(record)
            }
            Err(e) => {
                if let IpamError::ConsistencyFault(_) = &e {
                    error!("Consistency fault releasing {}: {}", address, e);
                } else {
                    debug!("Release of {} failed: {}", address, e);
                }
                rollback(tx).await;
                Err(e)
            }
        }
    }

    /// The active record for `address`.
    pub async fn lookup(&self, address: Ipv4Addr) -> Result<EndpointRecord, IpamError> {
        self.check_in_cidr(address)?;
        self.store
            .find_by_address(address)
            .await?
            .ok_or_else(|| IpamError::NotFound(format!("endpoint {}", address)))
    }

    /// Allocation history of a triple, ordered by network ID.
    pub async fn endpoints(&self, triple: &Triple) -> Result<Vec<EndpointRecord>, IpamError> {
        self.layout.prefix_for(triple)?;
        self.store.list_endpoints(triple).await
    }

    fn check_in_cidr(&self, address: Ipv4Addr) -> Result<(), IpamError> {
        if self.layout.cidr().contains(&address) {
            Ok(())
        } else {
            Err(IpamError::InvalidRequest(format!(
                "{} is outside datacenter CIDR {}",
                address,
                self.layout.cidr()
            )))
        }
    }
}

async fn rollback(tx: Box<dyn EndpointTransaction>) {
    if let Err(e) = tx.rollback().await {
        error!("Rollback failed: {}", e);
    }
}
