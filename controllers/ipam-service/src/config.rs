//! Service configuration
//!
//! Read once from the environment at startup:
//!
//! - `IPAM_LISTEN_ADDR` (default `0.0.0.0:9601`)
//! - `IPAM_DATABASE_URL` (default `sqlite://ipam.db?mode=rwc`)
//! - `TOPOLOGY_URL`: fetch the layout from the topology service
//! - `IPAM_LAYOUT_FILE`: YAML layout, used when `TOPOLOGY_URL` is unset
//!
//! The layout is validated as soon as it is loaded; the service does not
//! start on an invalid one.

use ipam::{DatacenterLayout, LayoutSpec};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use topology_client::{Datacenter, TopologyClient, TopologySource};
use tracing::info;

use crate::error::ServiceError;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9601";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://ipam.db?mode=rwc";

/// Where the datacenter layout comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutSource {
    /// Topology service base URL
    Topology(String),
    /// YAML layout file
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub layout_source: LayoutSource,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServiceError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen = var("IPAM_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen.parse().map_err(|e| {
            ServiceError::InvalidConfig(format!("IPAM_LISTEN_ADDR={}: {}", listen, e))
        })?;

        let database_url =
            var("IPAM_DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let layout_source = match (var("TOPOLOGY_URL"), var("IPAM_LAYOUT_FILE")) {
            (Some(url), _) => LayoutSource::Topology(url),
            (None, Some(path)) => LayoutSource::File(PathBuf::from(path)),
            (None, None) => {
                return Err(ServiceError::InvalidConfig(
                    "either TOPOLOGY_URL or IPAM_LAYOUT_FILE must be set".to_string(),
                ));
            }
        };

        Ok(Self {
            listen_addr,
            database_url,
            layout_source,
        })
    }
}

/// Resolve and validate the datacenter layout
pub async fn load_layout(source: &LayoutSource) -> Result<DatacenterLayout, ServiceError> {
    match source {
        LayoutSource::Topology(url) => {
            info!("Fetching datacenter layout from topology service at {}", url);
            let client = TopologyClient::new(url.as_str())?;
            layout_from_topology(&client).await
        }
        LayoutSource::File(path) => {
            info!("Reading datacenter layout from {}", path.display());
            layout_from_file(path)
        }
    }
}

pub async fn layout_from_topology(
    source: &dyn TopologySource,
) -> Result<DatacenterLayout, ServiceError> {
    let datacenter = source.datacenter().await?;
    layout_from_datacenter(&datacenter)
}

/// Translate the topology's datacenter description into a validated layout
pub fn layout_from_datacenter(datacenter: &Datacenter) -> Result<DatacenterLayout, ServiceError> {
    let spec = LayoutSpec {
        cidr: datacenter.cidr,
        host_bits: datacenter.host_bits()?,
        tenant_bits: datacenter.tenant_bits,
        segment_bits: datacenter.segment_bits,
        endpoint_space_bits: datacenter.endpoint_space_bits,
        endpoint_bits: datacenter.endpoint_bits,
    };
    Ok(DatacenterLayout::new(spec)?)
}

pub fn layout_from_file(path: &Path) -> Result<DatacenterLayout, ServiceError> {
    let contents = std::fs::read_to_string(path)?;
    parse_layout(&contents)
}

/// Parse a YAML layout such as:
///
/// ```yaml
/// cidr: 10.0.0.0/8
/// host_bits: 8
/// tenant_bits: 4
/// segment_bits: 4
/// endpoint_space_bits: 0
/// endpoint_bits: 8
/// ```
pub fn parse_layout(yaml: &str) -> Result<DatacenterLayout, ServiceError> {
    let spec: LayoutSpec = serde_yaml::from_str(yaml)?;
    Ok(DatacenterLayout::new(spec)?)
}
