//! Datacenter address-space layout.
//!
//! The topology service decomposes the datacenter CIDR into bit fields.
//! Directly below the CIDR prefix, most significant first, sit the host,
//! tenant and segment fields; every remaining low-order bit belongs to the
//! endpoint region, where the [`encoder`](crate::encoder) places endpoints
//! `2^stride` apart.
//!
//! ```text
//! | CIDR prefix | host | tenant | segment | endpoint region            |
//!                                         |<- endpoint_width() bits -->|
//! ```
//!
//! A layout is validated once when it is built. Everything downstream can
//! rely on the fields fitting in 32 bits.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::encoder;
use crate::error::IpamError;
use crate::models::Triple;

/// Raw layout as published by the topology service or read from a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSpec {
    /// Datacenter CIDR, e.g. `10.0.0.0/8`
    pub cidr: Ipv4Net,
    /// Bits identifying the host
    pub host_bits: u8,
    pub tenant_bits: u8,
    pub segment_bits: u8,
    /// Bits the topology reserves for endpoint ordinals
    #[serde(default)]
    pub endpoint_space_bits: u8,
    /// Per-endpoint bits ("stride")
    #[serde(alias = "stride")]
    pub endpoint_bits: u8,
}

/// A validated datacenter layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatacenterLayout {
    spec: LayoutSpec,
    endpoint_width: u8,
}

impl DatacenterLayout {
    /// Validates `spec` and builds the layout.
    ///
    /// # Errors
    ///
    /// `ConfigurationFault` if the CIDR base has host bits set, the stride is
    /// out of range, the fields do not fit in 32 bits, or the endpoint region
    /// cannot hold a single endpoint.
    pub fn new(spec: LayoutSpec) -> Result<Self, IpamError> {
        if spec.cidr.addr() != spec.cidr.network() {
            return Err(IpamError::ConfigurationFault(format!(
                "CIDR {} has host bits set (network address is {})",
                spec.cidr,
                spec.cidr.network()
            )));
        }

        if spec.endpoint_bits > encoder::MAX_STRIDE {
            return Err(IpamError::ConfigurationFault(format!(
                "stride {} exceeds maximum of {} bits",
                spec.endpoint_bits,
                encoder::MAX_STRIDE
            )));
        }

        let prefix_len = u32::from(spec.cidr.prefix_len());
        let total = prefix_len
            + u32::from(spec.host_bits)
            + u32::from(spec.tenant_bits)
            + u32::from(spec.segment_bits)
            + u32::from(spec.endpoint_space_bits)
            + u32::from(spec.endpoint_bits);
        if total > 32 {
            return Err(IpamError::ConfigurationFault(format!(
                "layout for {} needs {} bits (prefix {} + host {} + tenant {} + segment {} + endpoint space {} + stride {}), IPv4 has 32",
                spec.cidr,
                total,
                prefix_len,
                spec.host_bits,
                spec.tenant_bits,
                spec.segment_bits,
                spec.endpoint_space_bits,
                spec.endpoint_bits
            )));
        }

        // Cannot underflow: the sum above is at most 32
        let endpoint_width = (32
            - prefix_len
            - u32::from(spec.host_bits)
            - u32::from(spec.tenant_bits)
            - u32::from(spec.segment_bits)) as u8;

        // The first endpoint (offset 3) must fit
        encoder::effective_offset(0, spec.endpoint_bits, endpoint_width)?;

        Ok(Self {
            spec,
            endpoint_width,
        })
    }

    /// The layout as it was configured
    pub fn spec(&self) -> &LayoutSpec {
        &self.spec
    }

    pub fn cidr(&self) -> Ipv4Net {
        self.spec.cidr
    }

    /// Per-endpoint bits
    pub fn stride(&self) -> u8 {
        self.spec.endpoint_bits
    }

    /// Width of the endpoint region in bits
    pub fn endpoint_width(&self) -> u8 {
        self.endpoint_width
    }

    fn segment_shift(&self) -> u32 {
        u32::from(self.endpoint_width)
    }

    fn tenant_shift(&self) -> u32 {
        self.segment_shift() + u32::from(self.spec.segment_bits)
    }

    fn host_shift(&self) -> u32 {
        self.tenant_shift() + u32::from(self.spec.tenant_bits)
    }

    /// Address-space base for a triple: the CIDR base with the host, tenant
    /// and segment fields filled in.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if an identifier is wider than its field.
    pub fn prefix_for(&self, triple: &Triple) -> Result<u32, IpamError> {
        check_fits("host", triple.host_id, self.spec.host_bits)?;
        check_fits("tenant", triple.tenant_id, self.spec.tenant_bits)?;
        check_fits("segment", triple.segment_id, self.spec.segment_bits)?;

        let fields = (triple.host_id << self.host_shift())
            | (triple.tenant_id << self.tenant_shift())
            | (triple.segment_id << self.segment_shift());
        let fields = u32::try_from(fields).map_err(|_| {
            IpamError::ConfigurationFault(format!(
                "fields for {} do not fit in an IPv4 address",
                triple
            ))
        })?;

        Ok(u32::from(self.spec.cidr.network()) | fields)
    }

    /// Recovers the triple and network ID an address was allocated for.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the address is outside the CIDR or does not sit on
    /// an endpoint offset.
    pub fn decompose(&self, address: Ipv4Addr) -> Result<(Triple, u64), IpamError> {
        if !self.spec.cidr.contains(&address) {
            return Err(IpamError::InvalidRequest(format!(
                "{} is outside datacenter CIDR {}",
                address, self.spec.cidr
            )));
        }

        let raw = u64::from(u32::from(address));
        let offset = raw & mask(self.endpoint_width);
        let segment_id = (raw >> self.segment_shift()) & mask(self.spec.segment_bits);
        let tenant_id = (raw >> self.tenant_shift()) & mask(self.spec.tenant_bits);
        let host_id = (raw >> self.host_shift()) & mask(self.spec.host_bits);

        let network_id = encoder::network_id_for_offset(offset, self.spec.endpoint_bits)
            .ok_or_else(|| IpamError::InvalidRequest(format!(
                "{} is not an endpoint address (offset {}, stride {})",
                address, offset, self.spec.endpoint_bits
            )))?;

        Ok((Triple::new(tenant_id, segment_id, host_id), network_id))
    }
}

impl TryFrom<LayoutSpec> for DatacenterLayout {
    type Error = IpamError;

    fn try_from(spec: LayoutSpec) -> Result<Self, Self::Error> {
        Self::new(spec)
    }
}

impl fmt::Display for DatacenterLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} host={} tenant={} segment={} endpoint_space={} stride={} (endpoint region {} bits)",
            self.spec.cidr,
            self.spec.host_bits,
            self.spec.tenant_bits,
            self.spec.segment_bits,
            self.spec.endpoint_space_bits,
            self.spec.endpoint_bits,
            self.endpoint_width
        )
    }
}

fn mask(bits: u8) -> u64 {
    (1u64 << bits) - 1
}

fn check_fits(field: &str, id: u64, bits: u8) -> Result<(), IpamError> {
    if id >> bits != 0 {
        return Err(IpamError::InvalidRequest(format!(
            "{} ID {} does not fit in {} bits",
            field, id, bits
        )));
    }
    Ok(())
}
