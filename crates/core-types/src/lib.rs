//! Core identifiers and shared lightweight types for kgsearch.
//!
//! These types intentionally avoid heavy dependencies and aim to be
//! serialization-friendly for bincode and IPC payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a vector within its owning matrix; the join key between a
/// matrix and its identifier sequence.
pub type RowIndex = usize;

/// Which of the two embedding tables an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Entities,
    Relations,
}

impl EmbeddingKind {
    /// Canonical mode string (`"entities"` / `"relations"`).
    pub const fn as_str(self) -> &'static str {
        match self {
            EmbeddingKind::Entities => "entities",
            EmbeddingKind::Relations => "relations",
        }
    }

    /// Parse a mode string. Only the exact lowercase names are accepted.
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "entities" => Some(EmbeddingKind::Entities),
            "relations" => Some(EmbeddingKind::Relations),
            _ => None,
        }
    }
}

impl fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single nearest-neighbour hit: identifier plus Euclidean distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbour {
    pub id: String,
    pub distance: f32,
}

impl Neighbour {
    pub fn new(id: impl Into<String>, distance: f32) -> Self {
        Self {
            id: id.into(),
            distance,
        }
    }
}

pub mod config;
