//! In-memory allocation store for unit testing
//!
//! Mirrors the SQLite store's semantics (uniqueness constraints, lowest
//! released network ID first, stride history check) without a database.
//! Transactions work on a copy of the table that replaces the shared one on
//! commit, so a failed or dropped transaction leaves no trace.
//!
//! For fault injection, [`MemoryEndpointStore::seed`] inserts rows without
//! any constraint checks and [`MemoryEndpointStore::fail_next_commit`] makes
//! the next commit fail.

use chrono::Utc;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::IpamError;
use crate::models::{EndpointRecord, NewEndpoint, Triple};
use crate::store_trait::{EndpointStore, EndpointTransaction};

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<EndpointRecord>,
    next_id: u64,
    fail_next_commit: bool,
}

/// In-memory endpoint store
#[derive(Debug, Clone, Default)]
pub struct MemoryEndpointStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw record, bypassing every constraint (for test setup)
    pub async fn seed(&self, record: EndpointRecord) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(record.id + 1);
        state.records.push(record);
    }

    /// Make the next commit fail with a store error
    pub async fn fail_next_commit(&self) {
        self.state.lock().await.fail_next_commit = true;
    }

    /// Snapshot of every committed record
    pub async fn records(&self) -> Vec<EndpointRecord> {
        self.state.lock().await.records.clone()
    }
}

#[async_trait::async_trait]
impl EndpointStore for MemoryEndpointStore {
    async fn begin(&self) -> Result<Box<dyn EndpointTransaction>, IpamError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.records.clone();
        let next_id = guard.next_id.max(1);
        Ok(Box::new(MemoryTransaction {
            working,
            next_id,
            guard,
        }))
    }

    async fn find_by_address(&self, address: Ipv4Addr) -> Result<Option<EndpointRecord>, IpamError> {
        let state = self.state.lock().await;
        let mut active: Vec<&EndpointRecord> = state
            .records
            .iter()
            .filter(|r| r.address == address && r.in_use)
            .collect();
        if active.len() > 1 {
            return Err(IpamError::ConsistencyFault(format!(
                "expected one active endpoint for {}, got {}",
                address,
                active.len()
            )));
        }
        Ok(active.pop().cloned())
    }

    async fn list_endpoints(&self, triple: &Triple) -> Result<Vec<EndpointRecord>, IpamError> {
        let state = self.state.lock().await;
        let mut records: Vec<EndpointRecord> = state
            .records
            .iter()
            .filter(|r| r.triple() == *triple)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.network_id);
        Ok(records)
    }
}

struct MemoryTransaction {
    working: Vec<EndpointRecord>,
    next_id: u64,
    guard: OwnedMutexGuard<MemoryState>,
}

#[async_trait::async_trait]
impl EndpointTransaction for MemoryTransaction {
    async fn find_by_token(&mut self, token: &str) -> Result<Option<EndpointRecord>, IpamError> {
        Ok(self
            .working
            .iter()
            .find(|r| r.in_use && r.request_token.as_deref() == Some(token))
            .cloned())
    }

    async fn reclaim(
        &mut self,
        triple: &Triple,
        name: &str,
        token: Option<&str>,
    ) -> Result<Option<EndpointRecord>, IpamError> {
        let slot = self
            .working
            .iter_mut()
            .filter(|r| r.triple() == *triple && !r.in_use)
            .min_by_key(|r| r.network_id);

        Ok(slot.map(|record| {
            record.in_use = true;
            record.name = name.to_string();
            record.request_token = token.map(str::to_string);
            record.updated_at = Utc::now();
            record.clone()
        }))
    }

    async fn mint_next_network_id(&mut self, triple: &Triple, stride: u8) -> Result<u64, IpamError> {
        let history: Vec<&EndpointRecord> = self
            .working
            .iter()
            .filter(|r| r.triple() == *triple)
            .collect();

        if let Some(other) = history.iter().find(|r| r.stride != stride) {
            return Err(IpamError::ConfigurationFault(format!(
                "{} has endpoints encoded with stride {}, refusing to mint with stride {}",
                triple, other.stride, stride
            )));
        }

        Ok(history
            .iter()
            .map(|r| r.network_id)
            .max()
            .map_or(0, |max| max + 1))
    }

    async fn persist(&mut self, endpoint: NewEndpoint) -> Result<EndpointRecord, IpamError> {
        if self.working.iter().any(|r| r.address == endpoint.address) {
            return Err(IpamError::ConflictViolation(format!(
                "UNIQUE constraint failed: endpoints.address ({})",
                endpoint.address
            )));
        }
        if self
            .working
            .iter()
            .any(|r| r.triple() == endpoint.triple && r.network_id == endpoint.network_id)
        {
            return Err(IpamError::ConflictViolation(format!(
                "UNIQUE constraint failed: endpoints.tenant_id, endpoints.segment_id, endpoints.host_id, endpoints.network_id ({} network {})",
                endpoint.triple, endpoint.network_id
            )));
        }
        if let Some(token) = endpoint.request_token.as_deref() {
            if self.working.iter().any(|r| r.request_token.as_deref() == Some(token)) {
                return Err(IpamError::ConflictViolation(format!(
                    "UNIQUE constraint failed: endpoints.request_token ({})",
                    token
                )));
            }
        }

        let now = Utc::now();
        let record = EndpointRecord {
            id: self.next_id,
            address: endpoint.address,
            tenant_id: endpoint.triple.tenant_id,
            segment_id: endpoint.triple.segment_id,
            host_id: endpoint.triple.host_id,
            network_id: endpoint.network_id,
            stride: endpoint.stride,
            in_use: true,
            request_token: endpoint.request_token,
            name: endpoint.name,
            created_at: now,
            updated_at: now,
        };
        self.next_id += 1;
        self.working.push(record.clone());
        Ok(record)
    }

    async fn release(&mut self, address: Ipv4Addr) -> Result<EndpointRecord, IpamError> {
        let mut active: Vec<&mut EndpointRecord> = self
            .working
            .iter_mut()
            .filter(|r| r.address == address && r.in_use)
            .collect();

        if active.len() > 1 {
            return Err(IpamError::ConsistencyFault(format!(
                "expected one active endpoint for {}, got {}",
                address,
                active.len()
            )));
        }
        let record = active
            .pop()
            .ok_or_else(|| IpamError::NotFound(format!("endpoint {}", address)))?;

        let former = record.clone();
        record.in_use = false;
        record.request_token = None;
        record.updated_at = Utc::now();
        Ok(former)
    }

    async fn commit(self: Box<Self>) -> Result<(), IpamError> {
        let MemoryTransaction {
            working,
            next_id,
            mut guard,
        } = *self;

        if guard.fail_next_commit {
            guard.fail_next_commit = false;
            return Err(IpamError::StoreFault(sqlx::Error::Protocol(
                "injected commit failure".to_string(),
            )));
        }

        guard.records = working;
        guard.next_id = next_id;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), IpamError> {
        Ok(())
    }
}
