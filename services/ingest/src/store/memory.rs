use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{CatalogSource, ObservationStore, StoreError, UploadLedger};
use crate::ledger::{NewUpload, UploadRecord, UploadUpdate};
use crate::model::{Block, Farm, Observation};

#[derive(Default)]
struct State {
    observations: BTreeMap<String, Observation>,
    upsert_calls: Vec<usize>,
    ledger_updates: usize,
    uploads: HashMap<Uuid, UploadRecord>,
}

/// In-process store: fixed catalog, fingerprint-keyed observations and an
/// upload ledger. Can be told to fail the n-th upsert call.
#[derive(Default)]
pub struct MemoryStore {
    farms: Vec<Farm>,
    blocks: Vec<Block>,
    fail_on_upsert: Option<usize>,
    fail_on_ledger_update: Option<usize>,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(farms: Vec<Farm>, blocks: Vec<Block>) -> Self {
        Self {
            farms,
            blocks,
            ..Self::default()
        }
    }

    /// Make the upsert call with this 1-based index return an error
    pub fn failing_on_upsert(mut self, call: usize) -> Self {
        self.fail_on_upsert = Some(call);
        self
    }

    /// Make the ledger update call with this 1-based index return an error
    pub fn failing_on_ledger_update(mut self, call: usize) -> Self {
        self.fail_on_ledger_update = Some(call);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // a panicked test thread must not hide the data from the next assertion
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn observation_count(&self) -> usize {
        self.state().observations.len()
    }

    /// Stored observations ordered by fingerprint
    pub fn observations(&self) -> Vec<Observation> {
        self.state().observations.values().cloned().collect()
    }

    /// Size of each upsert call, in call order
    pub fn upsert_calls(&self) -> Vec<usize> {
        self.state().upsert_calls.clone()
    }

    pub fn upload_records(&self) -> Vec<UploadRecord> {
        self.state().uploads.values().cloned().collect()
    }
}

#[async_trait]
impl CatalogSource for MemoryStore {
    async fn fetch_farms(&self) -> Result<Vec<Farm>, StoreError> {
        let mut farms = self.farms.clone();
        farms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(farms)
    }

    async fn fetch_blocks_by_farm(&self, farm_id: Uuid) -> Result<Vec<Block>, StoreError> {
        let mut blocks: Vec<Block> = self
            .blocks
            .iter()
            .filter(|b| b.farm_id == farm_id)
            .cloned()
            .collect();
        blocks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(blocks)
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn upsert_observations(&self, rows: &[Observation]) -> Result<(), StoreError> {
        let mut state = self.state();
        state.upsert_calls.push(rows.len());
        if self.fail_on_upsert == Some(state.upsert_calls.len()) {
            return Err(StoreError::Rejected(format!(
                "injected failure on upsert call {}",
                state.upsert_calls.len()
            )));
        }
        for row in rows {
            state
                .observations
                .insert(row.fingerprint.clone(), row.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl UploadLedger for MemoryStore {
    async fn create_upload_record(&self, new: &NewUpload) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.state()
            .uploads
            .insert(id, UploadRecord::start(id, new));
        Ok(id)
    }

    async fn update_upload_record(
        &self,
        id: Uuid,
        update: &UploadUpdate,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        state.ledger_updates += 1;
        if self.fail_on_ledger_update == Some(state.ledger_updates) {
            return Err(StoreError::Rejected(format!(
                "injected failure on ledger update {}",
                state.ledger_updates
            )));
        }
        let record = state
            .uploads
            .get_mut(&id)
            .ok_or(StoreError::UploadNotFound(id))?;
        record.apply(update);
        Ok(())
    }

    async fn get_upload_record(&self, id: Uuid) -> Result<Option<UploadRecord>, StoreError> {
        Ok(self.state().uploads.get(&id).cloned())
    }

    async fn list_upload_records(&self, limit: i64) -> Result<Vec<UploadRecord>, StoreError> {
        let mut records: Vec<UploadRecord> = self.state().uploads.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(records)
    }
}
