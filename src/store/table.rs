/// HNSW-backed in-memory view of one stored table
use super::record::IndexedRecord;
use super::{StoreError, TableInfo};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// HNSW graph parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnswParams {
    /// Connections per layer
    pub m: usize,
    /// Candidate list size while building (higher = better recall, slower build)
    pub ef_construction: usize,
    /// Candidate list size while searching; raised to `k` when smaller
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// hnsw_rs caps the layer count at 16
const MAX_LAYERS: usize = 16;

/// One nearest-neighbour hit
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub record: Arc<IndexedRecord>,
    /// Cosine distance, `1 - cosine similarity`
    pub distance: f32,
}

/// Searchable table: the stored records plus an HNSW graph over their vectors
pub struct VectorTable {
    info: TableInfo,
    records: Vec<Arc<IndexedRecord>>,
    index: Hnsw<'static, f32, DistCosine>,
    ef_search: usize,
}

impl VectorTable {
    /// Build the graph over `records`; every vector must have `info.dimension` entries
    pub fn build(
        info: TableInfo,
        records: Vec<IndexedRecord>,
        params: &HnswParams,
    ) -> Result<Self, StoreError> {
        if let Some(bad) = records.iter().find(|r| r.vector.len() != info.dimension) {
            return Err(StoreError::DimensionMismatch {
                table: info.name.clone(),
                expected: info.dimension,
                actual: bad.vector.len(),
            });
        }

        let index = Hnsw::<f32, DistCosine>::new(
            params.m,
            records.len().max(1),
            MAX_LAYERS,
            params.ef_construction,
            DistCosine,
        );

        let records: Vec<Arc<IndexedRecord>> = records.into_iter().map(Arc::new).collect();
        for (idx, record) in records.iter().enumerate() {
            index.insert((&record.vector, idx));
        }

        tracing::debug!(
            "Built HNSW graph for table '{}' ({} records, {}D)",
            info.name,
            records.len(),
            info.dimension
        );

        Ok(Self {
            info,
            records,
            index,
            ef_search: params.ef_search,
        })
    }

    fn check_query(&self, query: &[f32]) -> Result<(), StoreError> {
        if query.len() != self.info.dimension {
            return Err(StoreError::DimensionMismatch {
                table: self.info.name.clone(),
                expected: self.info.dimension,
                actual: query.len(),
            });
        }
        Ok(())
    }

    /// Approximate `k` nearest records, closest first
    pub fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>, StoreError> {
        self.check_query(query)?;
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }

        let k = k.min(self.records.len());
        let ef = self.ef_search.max(k);
        let mut matches: Vec<VectorMatch> = self
            .index
            .search(query, k, ef)
            .into_iter()
            .filter_map(|neighbour| {
                self.records.get(neighbour.d_id).map(|record| VectorMatch {
                    record: Arc::clone(record),
                    distance: neighbour.distance,
                })
            })
            .collect();

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(matches)
    }

    /// Every record ordered by exact cosine distance to `query`, closest first
    pub fn scan_nearest(&self, query: &[f32]) -> Result<Vec<VectorMatch>, StoreError> {
        self.check_query(query)?;

        let mut matches: Vec<VectorMatch> = self
            .records
            .iter()
            .map(|record| VectorMatch {
                record: Arc::clone(record),
                distance: cosine_distance(query, &record.vector),
            })
            .collect();

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(matches)
    }

    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn dimension(&self) -> usize {
        self.info.dimension
    }

    pub fn records(&self) -> &[Arc<IndexedRecord>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// `1 - cos(a, b)`; zero vectors are maximally distant
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (mag_a * mag_b)
}
