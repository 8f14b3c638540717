//! Hybrid retrieval
//!
//! Every query runs a k-NN search over the embedded records. Queries about
//! attributes ("characters with red eyes") additionally run a keyword pass
//! over the same table, and the two lists are merged with a weighted score
//! that favours exact attribute matches.

mod candidate;
mod hybrid;
mod merge;

pub use candidate::{SearchCandidate, SearchHit};
pub use hybrid::{HybridSearcher, SearchError};
pub use merge::{merge_and_rank_results, MergeError, MergeWeights};
