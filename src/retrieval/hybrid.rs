//! Hybrid search combining vector and keyword retrieval

use super::candidate::SearchHit;
use super::merge::{merge_and_rank_results, MergeError, MergeWeights};
use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::patterns::{KeyTerm, KeyTermKind, PatternRegistry};
use crate::store::{IndexHandle, StoreError, VectorMatch, VectorTable};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Index '{0}' is not ready; run ingestion first")]
    IndexNotReady(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Vector store error: {0}")]
    Store(StoreError),

    #[error("Query pattern error: {0}")]
    Pattern(String),
}

impl SearchError {
    pub fn status_code(&self) -> u16 {
        match self {
            SearchError::IndexNotReady(_) => 503,
            SearchError::Embedding(e) => e.status_code(),
            SearchError::InvalidQuery(_) => 400,
            SearchError::Store(_) | SearchError::Pattern(_) => 500,
        }
    }
}

impl From<StoreError> for SearchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TableNotFound(name) | StoreError::EmptyTable(name) => {
                SearchError::IndexNotReady(name)
            }
            other => SearchError::Store(other),
        }
    }
}

impl From<MergeError> for SearchError {
    fn from(e: MergeError) -> Self {
        SearchError::InvalidQuery(e.to_string())
    }
}

/// Searcher that blends nearest-neighbour results with exact attribute
/// matches for queries like "characters with red eyes"
pub struct HybridSearcher {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<IndexHandle>,
    patterns: Arc<PatternRegistry>,
    config: RetrievalConfig,
    weights: MergeWeights,
}

impl HybridSearcher {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<IndexHandle>,
        patterns: Arc<PatternRegistry>,
        config: RetrievalConfig,
    ) -> Result<Self, SearchError> {
        let weights = MergeWeights::from_config(&config)?;
        Ok(Self {
            provider,
            index,
            patterns,
            config,
            weights,
        })
    }

    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.index
    }

    pub fn patterns(&self) -> &PatternRegistry {
        &self.patterns
    }

    pub fn default_limit(&self) -> usize {
        self.config.default_limit
    }

    /// Candidate count fetched per path before the final cut to `limit`
    pub fn search_limit(&self, limit: usize, attribute_query: bool) -> usize {
        if attribute_query {
            (limit * self.config.attribute_multiplier).max(self.config.attribute_min_candidates)
        } else {
            limit
        }
    }

    /// Perform hybrid search, returning at most `limit` hits
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if limit == 0 {
            return Err(SearchError::InvalidQuery(
                "Limit must be at least 1".to_string(),
            ));
        }
        let limit = limit.min(self.config.max_limit);

        let table = self.index.get().await?;
        if table.is_empty() {
            return Err(SearchError::IndexNotReady(table.name().to_string()));
        }

        let attribute_query = self.patterns.is_attribute_query(query);
        let search_limit = self.search_limit(limit, attribute_query);
        tracing::debug!(
            query,
            attribute_query,
            classifier = self.patterns.matching_classifier(query),
            search_limit,
            "Running search"
        );

        let query_vector = self.provider.embed(query).await?;
        if query_vector.len() != table.dimension() {
            return Err(SearchError::Embedding(EmbeddingError::DimensionMismatch {
                expected: table.dimension(),
                actual: query_vector.len(),
            }));
        }

        let vector_results = table.vector_search(&query_vector, search_limit)?;

        if !attribute_query {
            return Ok(vector_results
                .iter()
                .take(limit)
                .map(|m| SearchHit::from_record(&m.record, 1.0 - m.distance))
                .collect());
        }

        let terms = self
            .patterns
            .extract_key_terms(query)
            .map_err(|e| SearchError::Pattern(e.to_string()))?;
        let keyword_results = keyword_search(&table, &query_vector, &terms, search_limit)?;
        tracing::debug!(
            terms = ?terms.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(),
            vector = vector_results.len(),
            keyword = keyword_results.len(),
            "Merging result lists"
        );

        let merged = merge_and_rank_results(&vector_results, &keyword_results, &self.weights);
        Ok(merged
            .iter()
            .take(limit)
            .map(|c| SearchHit::from_record(&c.record, c.combined_score))
            .collect())
    }
}

/// Records whose text contains any key term, over the whole table.
///
/// Ordered composite matches first, then by number of matched terms; ties
/// keep distance order. At most `limit` are returned.
pub(crate) fn keyword_search(
    table: &VectorTable,
    query_vector: &[f32],
    terms: &[KeyTerm],
    limit: usize,
) -> Result<Vec<VectorMatch>, StoreError> {
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let mut matched: Vec<(VectorMatch, bool, usize)> = table
        .scan_nearest(query_vector)?
        .into_iter()
        .filter_map(|m| {
            let mut composite = false;
            let mut count = 0;
            for term in terms.iter().filter(|t| t.matches(&m.record.text)) {
                count += 1;
                composite |= term.kind == KeyTermKind::Composite;
            }
            (count > 0).then_some((m, composite, count))
        })
        .collect();

    matched.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
    Ok(matched
        .into_iter()
        .take(limit)
        .map(|(m, _, _)| m)
        .collect())
}
