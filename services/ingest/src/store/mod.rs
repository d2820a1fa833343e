//! Persistence seams. The pipeline only talks to these traits; `PgStore`
//! backs them with the hosted Postgres schema and `MemoryStore` keeps
//! everything in process.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::{NewUpload, UploadRecord, UploadUpdate};
use crate::model::{Block, Farm, Observation};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("upload record {0} not found")]
    UploadNotFound(Uuid),
}

/// Read-only farm/block catalog
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_farms(&self) -> Result<Vec<Farm>, StoreError>;
    async fn fetch_blocks_by_farm(&self, farm_id: Uuid) -> Result<Vec<Block>, StoreError>;
}

/// Monitoring observations, unique by fingerprint
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Insert-or-replace keyed by `fingerprint`
    async fn upsert_observations(&self, rows: &[Observation]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UploadLedger: Send + Sync {
    async fn create_upload_record(&self, new: &NewUpload) -> Result<Uuid, StoreError>;
    async fn update_upload_record(&self, id: Uuid, update: &UploadUpdate)
        -> Result<(), StoreError>;
    async fn get_upload_record(&self, id: Uuid) -> Result<Option<UploadRecord>, StoreError>;
    /// Most recent first
    async fn list_upload_records(&self, limit: i64) -> Result<Vec<UploadRecord>, StoreError>;
}

/// Collapse rows sharing a fingerprint, keeping the last occurrence at the
/// position of the first one.
pub(crate) fn dedupe_by_fingerprint(rows: &[Observation]) -> Vec<&Observation> {
    let mut position: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    let mut out: Vec<&Observation> = Vec::with_capacity(rows.len());
    for row in rows {
        match position.get(row.fingerprint.as_str()) {
            Some(&i) => out[i] = row,
            None => {
                position.insert(row.fingerprint.as_str(), out.len());
                out.push(row);
            }
        }
    }
    out
}
