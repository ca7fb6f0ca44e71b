//! Exact nearest-neighbour search over knowledge-graph embeddings.
//!
//! A [`NearestNeighbourIndex`] is built once over either the entity or the
//! relation matrix of an [`embedding_store::EmbeddingStore`] and answers
//! k-nearest queries by brute-force Euclidean distance.

pub mod flat;

pub use flat::{Hit, NearestNeighbourIndex, SearchResults};
