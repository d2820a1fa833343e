//! Farm/block lookup built from a catalog snapshot taken at the start of an
//! ingestion run. Resolution is exact on normalized names; nothing here does
//! distance matching.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{Block, Farm};
use crate::normalize::normalize_text;
use crate::store::{CatalogSource, StoreError};

static FIRST_DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("valid regex"));

/// Outcome of a farm lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FarmMatch<'a> {
    Found(&'a Farm),
    /// Two or more catalog farms normalize to this key
    Ambiguous,
    NotFound,
}

/// Name index of one farm's blocks
#[derive(Debug, Default, Clone)]
struct BlockIndex {
    by_name: HashMap<String, Uuid>,
    by_number: HashMap<String, Uuid>,
}

impl BlockIndex {
    fn build(blocks: &[Block]) -> Self {
        let mut by_name = HashMap::new();
        let mut by_number: HashMap<String, Uuid> = HashMap::new();
        let mut shared_numbers = HashSet::new();

        for block in blocks {
            by_name.insert(normalize_text(&block.name), block.id);

            if let Some(m) = FIRST_DIGIT_RUN.find(&block.name) {
                let number = m.as_str().to_string();
                match by_number.get(&number) {
                    Some(existing) if *existing != block.id => {
                        shared_numbers.insert(number);
                    }
                    _ => {
                        by_number.insert(number, block.id);
                    }
                }
            }
        }

        // "BLOQUE 1" and "BLOQUE 1A" both carry "1": the bare number names neither
        for number in shared_numbers {
            debug!(number = %number, "block number alias is shared, dropping it");
            by_number.remove(&number);
        }

        Self { by_name, by_number }
    }

    fn resolve(&self, key: &str) -> Option<Uuid> {
        self.by_name
            .get(key)
            .or_else(|| self.by_number.get(key))
            .copied()
    }
}

/// Read-only resolver over one catalog snapshot.
#[derive(Debug, Default, Clone)]
pub struct CatalogResolver {
    farms: HashMap<String, Farm>,
    ambiguous_farms: HashSet<String>,
    blocks: HashMap<Uuid, BlockIndex>,
}

impl CatalogResolver {
    /// Build the indexes from farms and `(farm_id, blocks)` pairs
    pub fn build(farms: Vec<Farm>, blocks_by_farm: HashMap<Uuid, Vec<Block>>) -> Self {
        let mut by_key: HashMap<String, Farm> = HashMap::new();
        let mut ambiguous = HashSet::new();

        for farm in farms {
            let key = normalize_text(&farm.name);
            if let Some(previous) = by_key.get(&key) {
                if previous.id != farm.id {
                    warn!(
                        key = %key,
                        first = %previous.name,
                        second = %farm.name,
                        "catalog farms collide after normalization"
                    );
                    ambiguous.insert(key.clone());
                }
            }
            by_key.insert(key, farm);
        }

        let blocks = blocks_by_farm
            .iter()
            .map(|(farm_id, blocks)| (*farm_id, BlockIndex::build(blocks)))
            .collect();

        Self {
            farms: by_key,
            ambiguous_farms: ambiguous,
            blocks,
        }
    }

    /// Snapshot the catalog through `source`: all farms, then each farm's blocks
    pub async fn load(source: &dyn CatalogSource) -> Result<Self, StoreError> {
        let farms = source.fetch_farms().await?;
        let mut blocks_by_farm = HashMap::with_capacity(farms.len());
        for farm in &farms {
            let blocks = source.fetch_blocks_by_farm(farm.id).await?;
            blocks_by_farm.insert(farm.id, blocks);
        }
        let resolver = Self::build(farms, blocks_by_farm);
        debug!(
            farms = resolver.farm_count(),
            ambiguous = resolver.ambiguous_farms.len(),
            "catalog snapshot loaded"
        );
        Ok(resolver)
    }

    pub fn resolve_farm(&self, raw_name: &str) -> FarmMatch<'_> {
        let key = normalize_text(raw_name);
        if self.ambiguous_farms.contains(&key) {
            return FarmMatch::Ambiguous;
        }
        match self.farms.get(&key) {
            Some(farm) => FarmMatch::Found(farm),
            None => FarmMatch::NotFound,
        }
    }

    /// Block id by normalized name, then by bare block number
    pub fn resolve_block(&self, farm_id: Uuid, raw_name: &str) -> Option<Uuid> {
        self.blocks
            .get(&farm_id)?
            .resolve(&normalize_text(raw_name))
    }

    pub fn farm_count(&self) -> usize {
        self.farms.len()
    }

    /// Normalized farm keys shared by more than one catalog farm
    pub fn ambiguous_farm_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.ambiguous_farms.iter().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
