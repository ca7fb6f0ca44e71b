use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Instant;

use core_types::config::ArtifactsConfig;
use core_types::{EmbeddingKind, RowIndex};
use tracing::{debug, info};

use crate::error::{EmbeddingError, Result};
use crate::ids::IdentifierMap;
use crate::matrix::{EmbeddingMatrix, euclidean};
use crate::npy;

/// Default DGL-KE mapping file names.
pub const DEFAULT_MAPPING_FILES: [&str; 2] = ["entities.tsv", "relations.tsv"];

/// Paths of the four artifacts a store is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub entity_matrix: PathBuf,
    pub relation_matrix: PathBuf,
    pub entity_ids: PathBuf,
    pub relation_ids: PathBuf,
}

impl ArtifactPaths {
    /// DGL-KE layout: two `.npy` matrices in one folder, two TSV mappings in another.
    pub fn dglke(
        embeddings_dir: impl AsRef<Path>,
        matrix_files: [&str; 2],
        mappings_dir: impl AsRef<Path>,
        mapping_files: [&str; 2],
    ) -> Self {
        let embeddings_dir = embeddings_dir.as_ref();
        let mappings_dir = mappings_dir.as_ref();
        Self {
            entity_matrix: embeddings_dir.join(matrix_files[0]),
            relation_matrix: embeddings_dir.join(matrix_files[1]),
            entity_ids: mappings_dir.join(mapping_files[0]),
            relation_ids: mappings_dir.join(mapping_files[1]),
        }
    }

    pub fn from_config(cfg: &ArtifactsConfig) -> Self {
        Self {
            entity_matrix: cfg.entity_matrix_path(),
            relation_matrix: cfg.relation_matrix_path(),
            entity_ids: cfg.entity_ids_path(),
            relation_ids: cfg.relation_ids_path(),
        }
    }
}

/// Row counts and dimensions of both tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub entities: usize,
    pub entity_dim: usize,
    pub relations: usize,
    pub relation_dim: usize,
}

/// Read-only entity and relation embeddings with their identifier mappings.
///
/// Row `i` of each matrix is the embedding of identifier `i` of the matching
/// [`IdentifierMap`]. That alignment is checked once at construction and the
/// store is immutable afterwards, so it can be shared freely across threads.
#[derive(Debug)]
pub struct EmbeddingStore {
    entity_vectors: EmbeddingMatrix,
    entity_ids: IdentifierMap,
    relation_vectors: EmbeddingMatrix,
    relation_ids: IdentifierMap,
}

impl EmbeddingStore {
    pub fn new(
        entity_vectors: EmbeddingMatrix,
        entity_ids: IdentifierMap,
        relation_vectors: EmbeddingMatrix,
        relation_ids: IdentifierMap,
    ) -> Result<Self> {
        check_aligned("entities", &entity_vectors, &entity_ids)?;
        check_aligned("relations", &relation_vectors, &relation_ids)?;
        Ok(Self {
            entity_vectors,
            entity_ids,
            relation_vectors,
            relation_ids,
        })
    }

    /// Load both matrices and both identifier files.
    pub fn from_artifacts(paths: &ArtifactPaths) -> Result<Self> {
        let started = Instant::now();

        let entity_vectors = npy::load_f32(&paths.entity_matrix)?;
        debug!(path = %paths.entity_matrix.display(), rows = entity_vectors.rows(), dim = entity_vectors.dim(), "loaded entity matrix");
        let relation_vectors = npy::load_f32(&paths.relation_matrix)?;
        debug!(path = %paths.relation_matrix.display(), rows = relation_vectors.rows(), dim = relation_vectors.dim(), "loaded relation matrix");
        let entity_ids = IdentifierMap::load_tsv(&paths.entity_ids)?;
        let relation_ids = IdentifierMap::load_tsv(&paths.relation_ids)?;

        check_aligned(paths.entity_ids.display(), &entity_vectors, &entity_ids)?;
        check_aligned(paths.relation_ids.display(), &relation_vectors, &relation_ids)?;

        let store = Self {
            entity_vectors,
            entity_ids,
            relation_vectors,
            relation_ids,
        };
        let stats = store.stats();
        info!(
            entities = stats.entities,
            entity_dim = stats.entity_dim,
            relations = stats.relations,
            relation_dim = stats.relation_dim,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedding store loaded"
        );
        Ok(store)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entities: self.entity_vectors.rows(),
            entity_dim: self.entity_vectors.dim(),
            relations: self.relation_vectors.rows(),
            relation_dim: self.relation_vectors.dim(),
        }
    }

    pub fn matrix(&self, kind: EmbeddingKind) -> &EmbeddingMatrix {
        match kind {
            EmbeddingKind::Entities => &self.entity_vectors,
            EmbeddingKind::Relations => &self.relation_vectors,
        }
    }

    pub fn ids(&self, kind: EmbeddingKind) -> &IdentifierMap {
        match kind {
            EmbeddingKind::Entities => &self.entity_ids,
            EmbeddingKind::Relations => &self.relation_ids,
        }
    }

    pub fn entity_vector_matrix(&self) -> &EmbeddingMatrix {
        &self.entity_vectors
    }

    pub fn relation_vector_matrix(&self) -> &EmbeddingMatrix {
        &self.relation_vectors
    }

    pub fn row_of(&self, kind: EmbeddingKind, id: &str) -> Result<RowIndex> {
        self.ids(kind)
            .row_of(id)
            .ok_or_else(|| EmbeddingError::UnknownIdentifier(id.to_string()))
    }

    /// Resolve every identifier to its row, preserving request order.
    /// Fails on the first unknown identifier; nothing partial is returned.
    pub fn rows_for<S: AsRef<str>>(&self, kind: EmbeddingKind, ids: &[S]) -> Result<Vec<RowIndex>> {
        ids.iter().map(|id| self.row_of(kind, id.as_ref())).collect()
    }

    pub fn vector(&self, kind: EmbeddingKind, id: &str) -> Result<&[f32]> {
        let row = self.row_of(kind, id)?;
        self.matrix(kind).row(row).ok_or(EmbeddingError::IndexOutOfRange {
            index: row,
            len: self.matrix(kind).rows(),
        })
    }

    /// Vectors for `ids`, row `i` belonging to `ids[i]`. An empty request
    /// borrows the whole matrix unchanged.
    pub fn vectors_for<S: AsRef<str>>(
        &self,
        kind: EmbeddingKind,
        ids: &[S],
    ) -> Result<Cow<'_, EmbeddingMatrix>> {
        let matrix = self.matrix(kind);
        if ids.is_empty() {
            return Ok(Cow::Borrowed(matrix));
        }
        let rows = self.rows_for(kind, ids)?;
        Ok(Cow::Owned(matrix.gather(&rows)?))
    }

    pub fn entity_vectors_for<S: AsRef<str>>(&self, ids: &[S]) -> Result<Cow<'_, EmbeddingMatrix>> {
        self.vectors_for(EmbeddingKind::Entities, ids)
    }

    pub fn relation_vectors_for<S: AsRef<str>>(
        &self,
        ids: &[S],
    ) -> Result<Cow<'_, EmbeddingMatrix>> {
        self.vectors_for(EmbeddingKind::Relations, ids)
    }

    pub fn entity_vector(&self, id: &str) -> Result<&[f32]> {
        self.vector(EmbeddingKind::Entities, id)
    }

    pub fn relation_vector(&self, id: &str) -> Result<&[f32]> {
        self.vector(EmbeddingKind::Relations, id)
    }

    /// Identifiers for row indices, in input order.
    pub fn ids_for_rows(&self, kind: EmbeddingKind, rows: &[RowIndex]) -> Result<Vec<String>> {
        let ids = self.ids(kind);
        rows.iter()
            .map(|&row| {
                ids.id_at(row)
                    .map(str::to_string)
                    .ok_or(EmbeddingError::IndexOutOfRange {
                        index: row,
                        len: ids.len(),
                    })
            })
            .collect()
    }

    pub fn ids_for_entity_rows(&self, rows: &[RowIndex]) -> Result<Vec<String>> {
        self.ids_for_rows(EmbeddingKind::Entities, rows)
    }

    pub fn ids_for_relation_rows(&self, rows: &[RowIndex]) -> Result<Vec<String>> {
        self.ids_for_rows(EmbeddingKind::Relations, rows)
    }

    /// Euclidean distance between two members of one table.
    ///
    /// Equal identifiers short-circuit to exactly `0.0` without a lookup, so
    /// the result is defined even for identifiers the store does not hold.
    pub fn pairwise_distance(&self, kind: EmbeddingKind, a: &str, b: &str) -> Result<f32> {
        if a == b {
            return Ok(0.0);
        }
        let va = self.vector(kind, a)?;
        let vb = self.vector(kind, b)?;
        Ok(euclidean(va, vb))
    }

    pub fn pairwise_entity_distance(&self, a: &str, b: &str) -> Result<f32> {
        self.pairwise_distance(EmbeddingKind::Entities, a, b)
    }

    pub fn pairwise_relation_distance(&self, a: &str, b: &str) -> Result<f32> {
        self.pairwise_distance(EmbeddingKind::Relations, a, b)
    }
}

fn check_aligned(
    artifact: impl std::fmt::Display,
    matrix: &EmbeddingMatrix,
    ids: &IdentifierMap,
) -> Result<()> {
    if matrix.rows() != ids.len() {
        return Err(EmbeddingError::malformed(
            artifact,
            format!(
                "matrix has {} rows but identifier list has {} entries",
                matrix.rows(),
                ids.len()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> EmbeddingStore {
        let entities =
            EmbeddingMatrix::from_rows([[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0], [5.0, 5.0]]).unwrap();
        let entity_ids = IdentifierMap::from_ordered(["a", "b", "c", "d"], "entities").unwrap();
        let relations = EmbeddingMatrix::from_rows([[1.0f32, 1.0, 1.0], [0.0, 0.0, 2.0]]).unwrap();
        let relation_ids = IdentifierMap::from_ordered(["r1", "r2"], "relations").unwrap();
        EmbeddingStore::new(entities, entity_ids, relations, relation_ids).unwrap()
    }

    fn rows_of(m: &EmbeddingMatrix) -> Vec<Vec<f32>> {
        m.iter_rows().map(<[f32]>::to_vec).collect()
    }

    #[test]
    fn entity_vectors_follow_request_order() {
        let store = store();
        let got = store.entity_vectors_for(&["d", "a", "c"]).unwrap();
        assert_eq!(
            rows_of(&got),
            vec![vec![5.0, 5.0], vec![0.0, 0.0], vec![0.0, 1.0]]
        );
    }

    #[test]
    fn relation_vectors_follow_request_order() {
        let store = store();
        let got = store.relation_vectors_for(&["r2", "r1"]).unwrap();
        assert_eq!(rows_of(&got), vec![vec![0.0, 0.0, 2.0], vec![1.0, 1.0, 1.0]]);
    }

    #[test]
    fn empty_request_borrows_full_matrix() {
        let store = store();
        let got = store.entity_vectors_for::<&str>(&[]).unwrap();
        assert!(matches!(got, Cow::Borrowed(_)));
        assert_eq!(&*got, store.entity_vector_matrix());
    }

    #[test]
    fn any_unknown_identifier_fails_the_whole_request() {
        let store = store();
        match store.entity_vectors_for(&["a", "zzz", "b"]) {
            Err(EmbeddingError::UnknownIdentifier(id)) => assert_eq!(id, "zzz"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            store.relation_vectors_for(&["a"]),
            Err(EmbeddingError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn ids_for_rows_preserves_order_and_checks_bounds() {
        let store = store();
        assert_eq!(
            store.ids_for_entity_rows(&[3, 0, 3]).unwrap(),
            vec!["d", "a", "d"]
        );
        assert_eq!(store.ids_for_relation_rows(&[1]).unwrap(), vec!["r2"]);
        assert!(matches!(
            store.ids_for_entity_rows(&[0, 4]),
            Err(EmbeddingError::IndexOutOfRange { index: 4, len: 4 })
        ));
    }

    #[test]
    fn id_row_round_trip() {
        let store = store();
        let ids = ["c", "a", "d", "b"];
        let rows = store.rows_for(EmbeddingKind::Entities, &ids).unwrap();
        assert_eq!(store.ids_for_entity_rows(&rows).unwrap(), ids);
    }

    #[test]
    fn pairwise_distance() {
        let store = store();
        assert_eq!(store.pairwise_entity_distance("a", "b").unwrap(), 1.0);
        assert_eq!(store.pairwise_entity_distance("b", "c").unwrap(), 2f32.sqrt());
        assert_eq!(store.pairwise_relation_distance("r1", "r2").unwrap(), 3f32.sqrt());
    }

    #[test]
    fn equal_identifiers_are_zero_even_when_unknown() {
        let store = store();
        assert_eq!(store.pairwise_entity_distance("a", "a").unwrap(), 0.0);
        assert_eq!(store.pairwise_entity_distance("ghost", "ghost").unwrap(), 0.0);
        assert!(matches!(
            store.pairwise_entity_distance("a", "ghost"),
            Err(EmbeddingError::UnknownIdentifier(id)) if id == "ghost"
        ));
    }

    #[test]
    fn mismatched_row_counts_fail_construction() {
        let entities = EmbeddingMatrix::from_rows([[0.0f32, 0.0], [1.0, 0.0]]).unwrap();
        let ids = IdentifierMap::from_ordered(["a", "b", "c"], "entities").unwrap();
        let err = EmbeddingStore::new(
            entities,
            ids,
            EmbeddingMatrix::from_rows(Vec::<Vec<f32>>::new()).unwrap(),
            IdentifierMap::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EmbeddingError::MalformedArtifact { .. }));
    }

    fn write_artifacts(dir: &Path, entity_tsv: &str) -> ArtifactPaths {
        let paths = ArtifactPaths::dglke(
            dir,
            ["model_entity.npy", "model_relation.npy"],
            dir,
            DEFAULT_MAPPING_FILES,
        );
        let entities = EmbeddingMatrix::from_rows([[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]]).unwrap();
        let relations = EmbeddingMatrix::from_rows([[1.0f32, 2.0, 3.0]]).unwrap();
        npy::save_f32(&paths.entity_matrix, &entities).unwrap();
        npy::save_f32(&paths.relation_matrix, &relations).unwrap();
        std::fs::write(&paths.entity_ids, entity_tsv).unwrap();
        std::fs::write(&paths.relation_ids, "0\tfounded_by\n").unwrap();
        paths
    }

    #[test]
    fn loads_dglke_artifacts() {
        let dir = tempdir().unwrap();
        let paths = write_artifacts(dir.path(), "0\ta\n1\tb\n2\tc\n");
        let store = EmbeddingStore::from_artifacts(&paths).unwrap();
        assert_eq!(
            store.stats(),
            StoreStats {
                entities: 3,
                entity_dim: 2,
                relations: 1,
                relation_dim: 3
            }
        );
        assert_eq!(store.entity_vector("c").unwrap(), &[0.0, 1.0]);
        assert_eq!(store.relation_vector("founded_by").unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn artifact_row_mismatch_is_malformed() {
        let dir = tempdir().unwrap();
        let paths = write_artifacts(dir.path(), "0\ta\n1\tb\n");
        match EmbeddingStore::from_artifacts(&paths).unwrap_err() {
            EmbeddingError::MalformedArtifact { artifact, reason } => {
                assert!(artifact.ends_with("entities.tsv"));
                assert!(reason.contains("3 rows"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_matrix_is_malformed() {
        let dir = tempdir().unwrap();
        let paths = ArtifactPaths::dglke(dir.path(), ["nope.npy", "nope2.npy"], dir.path(), DEFAULT_MAPPING_FILES);
        assert!(matches!(
            EmbeddingStore::from_artifacts(&paths),
            Err(EmbeddingError::MalformedArtifact { .. })
        ));
    }
}
