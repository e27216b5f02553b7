//! Static topology source for unit testing
//!
//! Serves a fixed datacenter description, or a fixed failure, without a
//! running topology service.

use std::sync::{Arc, Mutex};

use crate::error::TopologyError;
use crate::models::Datacenter;
use crate::topology_trait::TopologySource;

/// Fixed topology for testing
#[derive(Debug, Clone)]
pub struct StaticTopology {
    datacenter: Arc<Mutex<Option<Datacenter>>>,
}

impl StaticTopology {
    /// A source that always returns `datacenter`
    pub fn new(datacenter: Datacenter) -> Self {
        Self {
            datacenter: Arc::new(Mutex::new(Some(datacenter))),
        }
    }

    /// A source with nothing published, every fetch fails with an API error
    pub fn unavailable() -> Self {
        Self {
            datacenter: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the published description
    pub fn publish(&self, datacenter: Datacenter) {
        *self.datacenter.lock().unwrap_or_else(|e| e.into_inner()) = Some(datacenter);
    }
}

#[async_trait::async_trait]
impl TopologySource for StaticTopology {
    async fn datacenter(&self) -> Result<Datacenter, TopologyError> {
        let datacenter = self
            .datacenter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| TopologyError::Api("no datacenter published".to_string()))?;
        datacenter.host_bits()?;
        Ok(datacenter)
    }
}
