//! IPAM data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::encoder;
use crate::error::IpamError;

/// Placement context under which network IDs are scoped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub tenant_id: u64,
    pub segment_id: u64,
    pub host_id: u64,
}

impl Triple {
    pub fn new(tenant_id: u64, segment_id: u64, host_id: u64) -> Self {
        Self {
            tenant_id,
            segment_id,
            host_id,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tenant={} segment={} host={}",
            self.tenant_id, self.segment_id, self.host_id
        )
    }
}

/// An endpoint record (a VM, container, or pod address).
///
/// Records are never deleted; release only clears `in_use`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub id: u64,
    pub address: Ipv4Addr,
    pub tenant_id: u64,
    pub segment_id: u64,
    pub host_id: u64,
    /// Ordinal of this endpoint within its triple
    pub network_id: u64,
    /// Stride the address was encoded with
    pub stride: u8,
    pub in_use: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_token: Option<String>,
    #[serde(default)]
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EndpointRecord {
    pub fn triple(&self) -> Triple {
        Triple::new(self.tenant_id, self.segment_id, self.host_id)
    }

    /// Recomputes the effective network ID from `network_id` and `stride`.
    ///
    /// # Errors
    ///
    /// Fails only if the stored stride is out of range.
    pub fn effective_network_id(&self) -> Result<u64, IpamError> {
        encoder::effective_offset(self.network_id, self.stride, 64)
    }
}

/// A record about to be inserted by the allocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEndpoint {
    pub address: Ipv4Addr,
    pub triple: Triple,
    pub network_id: u64,
    pub stride: u8,
    pub name: String,
    pub request_token: Option<String>,
}

/// Request for an endpoint address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub tenant_id: u64,
    pub segment_id: u64,
    pub host_id: u64,
    #[serde(default)]
    pub name: String,
    /// Idempotency token; a retried request carrying the same token gets
    /// the original allocation back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_token: Option<String>,
}

impl AllocationRequest {
    /// Creates an anonymous request without a token
    pub fn new(triple: Triple) -> Self {
        Self {
            tenant_id: triple.tenant_id,
            segment_id: triple.segment_id,
            host_id: triple.host_id,
            name: String::new(),
            request_token: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.request_token = Some(token.into());
        self
    }

    pub fn triple(&self) -> Triple {
        Triple::new(self.tenant_id, self.segment_id, self.host_id)
    }
}

/// How an allocation was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationSource {
    /// The request token already held a live address
    Replayed,
    /// A released network ID of the triple was put back into use
    Reclaimed,
    /// A fresh network ID was minted and encoded
    Minted,
}
