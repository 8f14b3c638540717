//! Holocron - Star Wars trivia question answering
//!
//! Projects every entity of a static Star Wars dataset to text, embeds it
//! into a vector index, and answers questions through a hybrid search that
//! combines nearest-neighbour retrieval with exact attribute matching.

pub mod answer;
pub mod app;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod patterns;
pub mod progress;
pub mod projection;
pub mod retrieval;
pub mod server;
pub mod store;

pub use error::{HolocronError, Result};
