use core_types::RowIndex;
use thiserror::Error;

pub type Result<T, E = EmbeddingError> = std::result::Result<T, E>;

/// Errors surfaced by the embedding store and the nearest-neighbour index.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("malformed artifact {artifact}: {reason}")]
    MalformedArtifact { artifact: String, reason: String },
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
    #[error("row index {index} out of range for {len} rows")]
    IndexOutOfRange { index: RowIndex, len: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid mode {0:?}: expected \"entities\" or \"relations\"")]
    InvalidMode(String),
    #[error("neighbour integrity violated: nearest neighbour of {query:?} is {found:?}")]
    NeighbourIntegrity { query: String, found: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse category used by adapters to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    BadRequest,
    Conflict,
    Internal,
}

impl EmbeddingError {
    pub fn malformed(artifact: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        EmbeddingError::MalformedArtifact {
            artifact: artifact.to_string(),
            reason: reason.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            EmbeddingError::UnknownIdentifier(_) => ErrorClass::NotFound,
            EmbeddingError::InvalidArgument(_) | EmbeddingError::InvalidMode(_) => {
                ErrorClass::BadRequest
            }
            EmbeddingError::NeighbourIntegrity { .. } => ErrorClass::Conflict,
            EmbeddingError::IndexOutOfRange { .. }
            | EmbeddingError::MalformedArtifact { .. }
            | EmbeddingError::Io(_) => ErrorClass::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_boundary_mapping() {
        assert_eq!(
            EmbeddingError::UnknownIdentifier("x".into()).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            EmbeddingError::InvalidMode("nodes".into()).class(),
            ErrorClass::BadRequest
        );
        assert_eq!(
            EmbeddingError::InvalidArgument("k".into()).class(),
            ErrorClass::BadRequest
        );
        assert_eq!(
            EmbeddingError::NeighbourIntegrity {
                query: "a".into(),
                found: "b".into()
            }
            .class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            EmbeddingError::IndexOutOfRange { index: 9, len: 3 }.class(),
            ErrorClass::Internal
        );
    }

    #[test]
    fn malformed_message_names_the_artifact() {
        let err = EmbeddingError::malformed("entities.tsv", "line 3: missing tab");
        assert_eq!(
            err.to_string(),
            "malformed artifact entities.tsv: line 3: missing tab"
        );
    }
}
