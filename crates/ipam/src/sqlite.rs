//! SQLite-backed allocation store
//!
//! Endpoint records live in a single `endpoints` table. Uniqueness of
//! `address`, `request_token`, and `(tenant_id, segment_id, host_id,
//! network_id)` is enforced by the database, not just by the allocator.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, Transaction};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use crate::error::IpamError;
use crate::models::{EndpointRecord, NewEndpoint, Triple};
use crate::store_trait::{EndpointStore, EndpointTransaction};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS endpoints (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        address       INTEGER NOT NULL UNIQUE,
        tenant_id     INTEGER NOT NULL,
        segment_id    INTEGER NOT NULL,
        host_id       INTEGER NOT NULL,
        network_id    INTEGER NOT NULL,
        stride        INTEGER NOT NULL,
        in_use        BOOLEAN NOT NULL,
        request_token TEXT UNIQUE,
        name          TEXT NOT NULL DEFAULT '',
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_tenant_segment_host_network_id
        ON endpoints (tenant_id, segment_id, host_id, network_id)",
];

/// Endpoint table row as stored
#[derive(Debug, FromRow)]
struct EndpointRow {
    id: i64,
    address: i64,
    tenant_id: i64,
    segment_id: i64,
    host_id: i64,
    network_id: i64,
    stride: i64,
    in_use: bool,
    request_token: Option<String>,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EndpointRow> for EndpointRecord {
    type Error = IpamError;

    fn try_from(row: EndpointRow) -> Result<Self, Self::Error> {
        let address = u32::try_from(row.address).map_err(|_| {
            IpamError::ConsistencyFault(format!(
                "endpoint {} has out-of-range address {}",
                row.id, row.address
            ))
        })?;

        Ok(EndpointRecord {
            id: from_column(row.id, "id")?,
            address: Ipv4Addr::from(address),
            tenant_id: from_column(row.tenant_id, "tenant_id")?,
            segment_id: from_column(row.segment_id, "segment_id")?,
            host_id: from_column(row.host_id, "host_id")?,
            network_id: from_column(row.network_id, "network_id")?,
            stride: u8::try_from(row.stride).map_err(|_| {
                IpamError::ConsistencyFault(format!(
                    "endpoint {} has out-of-range stride {}",
                    row.id, row.stride
                ))
            })?,
            in_use: row.in_use,
            request_token: row.request_token,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn from_column(value: i64, column: &str) -> Result<u64, IpamError> {
    u64::try_from(value)
        .map_err(|_| IpamError::ConsistencyFault(format!("negative {} {} in endpoints table", column, value)))
}

fn to_column(value: u64, column: &str) -> Result<i64, IpamError> {
    i64::try_from(value)
        .map_err(|_| IpamError::InvalidRequest(format!("{} {} is too large to store", column, value)))
}

fn into_records(rows: Vec<EndpointRow>) -> Result<Vec<EndpointRecord>, IpamError> {
    rows.into_iter().map(EndpointRecord::try_from).collect()
}

/// Allocation store on top of a SQLite pool
///
/// Clones share the pool and the store-wide mutex.
#[derive(Debug, Clone)]
pub struct SqliteEndpointStore {
    pool: SqlitePool,
    lock: Arc<Mutex<()>>,
}

impl SqliteEndpointStore {
    /// Connect to `url` (e.g. `sqlite://ipam.db?mode=rwc`) and create the
    /// schema if it does not exist yet.
    pub async fn connect(url: &str) -> Result<Self, IpamError> {
        info!("Opening endpoint store at {}", url);

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.create_schema().await?;
        Ok(store)
    }

    /// A private in-memory database, mostly for tests.
    ///
    /// Each SQLite connection to `:memory:` is its own database, so the pool
    /// is pinned to one connection that never expires.
    pub async fn in_memory() -> Result<Self, IpamError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.create_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool. The schema is not touched.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the endpoints table and its unique indexes
    pub async fn create_schema(&self) -> Result<(), IpamError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Endpoint store schema ready");
        Ok(())
    }
}

#[async_trait::async_trait]
impl EndpointStore for SqliteEndpointStore {
    async fn begin(&self) -> Result<Box<dyn EndpointTransaction>, IpamError> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx, _guard: guard }))
    }

    async fn find_by_address(&self, address: Ipv4Addr) -> Result<Option<EndpointRecord>, IpamError> {
        let rows: Vec<EndpointRow> =
            sqlx::query_as("SELECT * FROM endpoints WHERE address = ? AND in_use = 1")
                .bind(i64::from(u32::from(address)))
                .fetch_all(&self.pool)
                .await?;

        let mut records = into_records(rows)?;
        if records.len() > 1 {
            error!("Expected at most one active endpoint for {}, got {}", address, records.len());
            return Err(IpamError::ConsistencyFault(format!(
                "expected one active endpoint for {}, got {}",
                address,
                records.len()
            )));
        }
        Ok(records.pop())
    }

    async fn list_endpoints(&self, triple: &Triple) -> Result<Vec<EndpointRecord>, IpamError> {
        let rows: Vec<EndpointRow> = sqlx::query_as(
            "SELECT * FROM endpoints
             WHERE tenant_id = ? AND segment_id = ? AND host_id = ?
             ORDER BY network_id ASC",
        )
        .bind(to_column(triple.tenant_id, "tenant_id")?)
        .bind(to_column(triple.segment_id, "segment_id")?)
        .bind(to_column(triple.host_id, "host_id")?)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }
}

/// An open SQLite transaction holding the store-wide mutex.
///
/// Field order matters: the transaction must be dropped (rolled back) before
/// the guard releases the mutex.
struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait::async_trait]
impl EndpointTransaction for SqliteTransaction {
    async fn find_by_token(&mut self, token: &str) -> Result<Option<EndpointRecord>, IpamError> {
        let row: Option<EndpointRow> =
            sqlx::query_as("SELECT * FROM endpoints WHERE request_token = ? AND in_use = 1")
                .bind(token)
                .fetch_optional(&mut *self.tx)
                .await?;

        row.map(EndpointRecord::try_from).transpose()
    }

    async fn reclaim(
        &mut self,
        triple: &Triple,
        name: &str,
        token: Option<&str>,
    ) -> Result<Option<EndpointRecord>, IpamError> {
        debug!("Looking for a released endpoint under {}", triple);

        let row: Option<EndpointRow> = sqlx::query_as(
            "UPDATE endpoints
             SET in_use = 1, name = ?, request_token = ?, updated_at = ?
             WHERE id = (
                 SELECT id FROM endpoints
                 WHERE tenant_id = ? AND segment_id = ? AND host_id = ? AND in_use = 0
                 ORDER BY network_id ASC
                 LIMIT 1
             )
             RETURNING *",
        )
        .bind(name)
        .bind(token)
        .bind(Utc::now())
        .bind(to_column(triple.tenant_id, "tenant_id")?)
        .bind(to_column(triple.segment_id, "segment_id")?)
        .bind(to_column(triple.host_id, "host_id")?)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(EndpointRecord::try_from).transpose()
    }

    async fn mint_next_network_id(&mut self, triple: &Triple, stride: u8) -> Result<u64, IpamError> {
        let (max_network_id, min_stride, max_stride): (Option<i64>, Option<i64>, Option<i64>) =
            sqlx::query_as(
                "SELECT MAX(network_id), MIN(stride), MAX(stride) FROM endpoints
                 WHERE tenant_id = ? AND segment_id = ? AND host_id = ?",
            )
            .bind(to_column(triple.tenant_id, "tenant_id")?)
            .bind(to_column(triple.segment_id, "segment_id")?)
            .bind(to_column(triple.host_id, "host_id")?)
            .fetch_one(&mut *self.tx)
            .await?;

        if let (Some(min), Some(max)) = (min_stride, max_stride) {
            if min != i64::from(stride) || max != i64::from(stride) {
                return Err(IpamError::ConfigurationFault(format!(
                    "{} has endpoints encoded with stride {}..={}, refusing to mint with stride {}",
                    triple, min, max, stride
                )));
            }
        }

        let next = match max_network_id {
            Some(max) => from_column(max, "network_id")? + 1,
            None => 0,
        };
        debug!("Max network ID for {}: {:?}, next is {}", triple, max_network_id, next);
        Ok(next)
    }

    async fn persist(&mut self, endpoint: NewEndpoint) -> Result<EndpointRecord, IpamError> {
        let now = Utc::now();
        let row: EndpointRow = sqlx::query_as(
            "INSERT INTO endpoints
                (address, tenant_id, segment_id, host_id, network_id, stride,
                 in_use, request_token, name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(i64::from(u32::from(endpoint.address)))
        .bind(to_column(endpoint.triple.tenant_id, "tenant_id")?)
        .bind(to_column(endpoint.triple.segment_id, "segment_id")?)
        .bind(to_column(endpoint.triple.host_id, "host_id")?)
        .bind(to_column(endpoint.network_id, "network_id")?)
        .bind(i64::from(endpoint.stride))
        .bind(endpoint.request_token.as_deref())
        .bind(endpoint.name.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        EndpointRecord::try_from(row)
    }

    async fn release(&mut self, address: Ipv4Addr) -> Result<EndpointRecord, IpamError> {
        let rows: Vec<EndpointRow> =
            sqlx::query_as("SELECT * FROM endpoints WHERE address = ? AND in_use = 1")
                .bind(i64::from(u32::from(address)))
                .fetch_all(&mut *self.tx)
                .await?;

        let mut records = into_records(rows)?;
        if records.len() > 1 {
            // Cannot happen while the address constraint holds
            error!("Expected one active endpoint for {}, got {:?}", address, records);
            return Err(IpamError::ConsistencyFault(format!(
                "expected one active endpoint for {}, got {}",
                address,
                records.len()
            )));
        }
        let record = records
            .pop()
            .ok_or_else(|| IpamError::NotFound(format!("endpoint {}", address)))?;

        let result = sqlx::query(
            "UPDATE endpoints SET in_use = 0, request_token = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(to_column(record.id, "id")?)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(IpamError::ConsistencyFault(format!(
                "releasing {} updated {} rows",
                address,
                result.rows_affected()
            )));
        }

        Ok(record)
    }

    async fn commit(self: Box<Self>) -> Result<(), IpamError> {
        let SqliteTransaction { tx, _guard } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), IpamError> {
        let SqliteTransaction { tx, _guard } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
