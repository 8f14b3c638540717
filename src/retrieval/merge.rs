//! Score fusion for the vector and keyword result lists

use super::candidate::SearchCandidate;
use crate::config::RetrievalConfig;
use crate::store::VectorMatch;
use ahash::AHashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Invalid weight configuration: weights must lie in [0, 1]")]
    InvalidWeights,
}

/// Weights of the linear score combination
#[derive(Debug, Clone, Copy)]
pub struct MergeWeights {
    pub keyword: f32,
    pub vector: f32,
    /// Added once for records both paths found
    pub agreement_bonus: f32,
}

impl MergeWeights {
    pub fn new(keyword: f32, vector: f32, agreement_bonus: f32) -> Result<Self, MergeError> {
        let valid = |w: f32| (0.0..=1.0).contains(&w);
        if !valid(keyword) || !valid(vector) || !valid(agreement_bonus) {
            return Err(MergeError::InvalidWeights);
        }
        Ok(Self {
            keyword,
            vector,
            agreement_bonus,
        })
    }

    pub fn from_config(config: &RetrievalConfig) -> Result<Self, MergeError> {
        Self::new(
            config.keyword_weight,
            config.vector_weight,
            config.agreement_bonus,
        )
    }
}

impl Default for MergeWeights {
    fn default() -> Self {
        Self {
            keyword: 0.7,
            vector: 0.3,
            agreement_bonus: 0.2,
        }
    }
}

/// Union both lists by record id and rank the union by combined score
///
/// * `vector_score = 1 - distance` (0 for keyword-only records)
/// * `keyword_score = 1 - rank / keyword_len` (0 for vector-only records)
/// * `combined = keyword * w_k + vector * w_v`, plus the agreement bonus
///   when both lists hold the record
///
/// Sorting is stable: equal scores keep vector-list order, then keyword order.
pub fn merge_and_rank_results(
    vector_results: &[VectorMatch],
    keyword_results: &[VectorMatch],
    weights: &MergeWeights,
) -> Vec<SearchCandidate> {
    let mut candidates: Vec<SearchCandidate> =
        Vec::with_capacity(vector_results.len() + keyword_results.len());
    let mut by_id: AHashMap<String, usize> = AHashMap::with_capacity(candidates.capacity());

    for (rank, hit) in vector_results.iter().enumerate() {
        if by_id.contains_key(&hit.record.id) {
            continue;
        }
        by_id.insert(hit.record.id.clone(), candidates.len());
        candidates.push(SearchCandidate {
            record: hit.record.clone(),
            distance: Some(hit.distance),
            vector_rank: Some(rank),
            vector_score: 1.0 - hit.distance,
            keyword_rank: None,
            keyword_score: 0.0,
            combined_score: 0.0,
        });
    }

    let keyword_len = keyword_results.len() as f32;
    for (rank, hit) in keyword_results.iter().enumerate() {
        let keyword_score = 1.0 - rank as f32 / keyword_len;
        match by_id.get(&hit.record.id) {
            Some(&i) => {
                let candidate = &mut candidates[i];
                if candidate.keyword_rank.is_none() {
                    candidate.keyword_rank = Some(rank);
                    candidate.keyword_score = keyword_score;
                }
            }
            None => {
                by_id.insert(hit.record.id.clone(), candidates.len());
                candidates.push(SearchCandidate {
                    record: hit.record.clone(),
                    distance: None,
                    vector_rank: None,
                    vector_score: 0.0,
                    keyword_rank: Some(rank),
                    keyword_score,
                    combined_score: 0.0,
                });
            }
        }
    }

    for candidate in &mut candidates {
        let mut combined =
            candidate.keyword_score * weights.keyword + candidate.vector_score * weights.vector;
        if candidate.in_both() {
            combined += weights.agreement_bonus;
        }
        candidate.combined_score = combined;
    }

    candidates.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}
