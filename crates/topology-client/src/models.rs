//! Topology service data models

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// Datacenter description as published by the topology service
///
/// The host field has carried two names over time; `port_bits` is the
/// older one and is still accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    #[serde(default)]
    pub name: String,
    pub cidr: Ipv4Net,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_bits: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_bits: Option<u8>,
    pub tenant_bits: u8,
    pub segment_bits: u8,
    #[serde(default)]
    pub endpoint_space_bits: u8,
    /// Per-endpoint bits ("stride")
    pub endpoint_bits: u8,
}

impl Datacenter {
    /// Width of the host field, from `host_bits` or the legacy `port_bits`
    pub fn host_bits(&self) -> Result<u8, TopologyError> {
        match (self.host_bits, self.port_bits) {
            (Some(host), Some(port)) if host != port => Err(TopologyError::InvalidLayout(format!(
                "datacenter {} publishes host_bits={} and port_bits={}",
                self.name, host, port
            ))),
            (Some(bits), _) | (None, Some(bits)) => Ok(bits),
            (None, None) => Err(TopologyError::InvalidLayout(format!(
                "datacenter {} publishes neither host_bits nor port_bits",
                self.name
            ))),
        }
    }
}
