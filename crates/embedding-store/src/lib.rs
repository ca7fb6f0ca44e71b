//! Knowledge-graph embedding store.
//!
//! Owns the entity and relation matrices produced by the training pipeline
//! together with their ordered identifier lists, and answers
//! identifier/row translation, vector lookup, and pairwise distance queries.
//! Everything here is immutable after construction.

pub mod error;
pub mod ids;
pub mod matrix;
pub mod npy;
pub mod store;

pub use error::{EmbeddingError, ErrorClass, Result};
pub use ids::IdentifierMap;
pub use matrix::{EmbeddingMatrix, euclidean, squared_l2};
pub use store::{ArtifactPaths, DEFAULT_MAPPING_FILES, EmbeddingStore, StoreStats};
