//! Topology service HTTP client
//!
//! Read-only: the topology service owns the CIDR decomposition, this
//! client only fetches it from `GET {base_url}/datacenter`.

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::TopologyError;
use crate::models::Datacenter;
use crate::topology_trait::TopologySource;

/// Topology service client
#[derive(Debug, Clone)]
pub struct TopologyClient {
    client: Client,
    base_url: String,
}

impl TopologyClient {
    /// Create a new topology client
    ///
    /// # Arguments
    /// * `base_url` - Topology service base URL (e.g., "http://topology:8080")
    pub fn new(base_url: impl Into<String>) -> Result<Self, TopologyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let base_url: String = base_url.into();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl TopologySource for TopologyClient {
    async fn datacenter(&self) -> Result<Datacenter, TopologyError> {
        let url = format!("{}/datacenter", self.base_url);
        debug!("Fetching datacenter layout from {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TopologyError::Api(format!(
                "Failed to fetch datacenter: {} - {}",
                status, body
            )));
        }

        let datacenter: Datacenter = serde_json::from_str(&body)?;
        // Surface a missing or contradictory host width here rather than at use
        datacenter.host_bits()?;

        debug!("Datacenter {} uses CIDR {}", datacenter.name, datacenter.cidr);
        Ok(datacenter)
    }
}
