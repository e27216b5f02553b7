//! Topology Service Client
//!
//! Fetches the datacenter CIDR decomposition (bit-field widths) that the
//! IPAM engine allocates within.
//!
//! # Example
//!
//! ```no_run
//! use topology_client::{TopologyClient, TopologySource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TopologyClient::new("http://topology:8080")?;
//! let datacenter = client.datacenter().await?;
//! println!("{} uses {}", datacenter.name, datacenter.cidr);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod topology_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;


pub use client::TopologyClient;
pub use error::TopologyError;
pub use models::Datacenter;
pub use topology_trait::TopologySource;
#[cfg(any(test, feature = "test-util"))]
pub use mock::StaticTopology;
