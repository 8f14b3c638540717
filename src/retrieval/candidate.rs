//! Search candidates and the hits returned to callers

use crate::store::{IndexedRecord, RecordMetadata};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A record under consideration while two result lists are merged
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub record: Arc<IndexedRecord>,
    /// Cosine distance from the vector path, if it found this record
    pub distance: Option<f32>,
    pub vector_rank: Option<usize>,
    pub vector_score: f32,
    pub keyword_rank: Option<usize>,
    pub keyword_score: f32,
    pub combined_score: f32,
}

impl SearchCandidate {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Found by both the vector and the keyword path
    pub fn in_both(&self) -> bool {
        self.vector_rank.is_some() && self.keyword_rank.is_some()
    }
}

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// Projected text of the entity
    pub content: String,
    pub metadata: RecordMetadata,
    /// Higher is better; `1 - distance` for plain queries, the combined
    /// score for attribute queries
    pub relevance: f32,
}

impl SearchHit {
    pub(crate) fn from_record(record: &IndexedRecord, relevance: f32) -> Self {
        Self {
            id: record.id.clone(),
            content: record.text.clone(),
            metadata: record.metadata.clone(),
            relevance,
        }
    }
}
