use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use core_types::{EmbeddingKind, RowIndex};
use embedding_store::{EmbeddingError, EmbeddingMatrix, EmbeddingStore, Result, squared_l2};
use rayon::prelude::*;
use tracing::{debug, info};

/// One search hit: a row of the indexed matrix and its Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub row: RowIndex,
    pub distance: f32,
}

/// Per-query identifiers and distances, positionally aligned with the queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub ids: Vec<Vec<String>>,
    pub distances: Vec<Vec<f32>>,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[String], &[f32])> + '_ {
        self.ids
            .iter()
            .zip(&self.distances)
            .map(|(ids, dists)| (ids.as_slice(), dists.as_slice()))
    }
}

/// Exact (brute-force) L2 index over one matrix of an [`EmbeddingStore`].
///
/// The index keeps the store alive through an `Arc`, so it always searches
/// the same matrix generation it translates identifiers against.
#[derive(Debug, Clone)]
pub struct NearestNeighbourIndex {
    store: Arc<EmbeddingStore>,
    mode: EmbeddingKind,
}

impl NearestNeighbourIndex {
    /// Build over the matrix named by `mode` (`"entities"` or `"relations"`).
    pub fn build(store: Arc<EmbeddingStore>, mode: &str) -> Result<Self> {
        let kind =
            EmbeddingKind::parse(mode).ok_or_else(|| EmbeddingError::InvalidMode(mode.into()))?;
        Ok(Self::build_with_mode(store, kind))
    }

    pub fn build_with_mode(store: Arc<EmbeddingStore>, mode: EmbeddingKind) -> Self {
        let index = Self { store, mode };
        info!(
            mode = %mode,
            rows = index.len(),
            dim = index.dim(),
            "built exact nearest-neighbour index"
        );
        index
    }

    pub fn mode(&self) -> EmbeddingKind {
        self.mode
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.matrix().rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.matrix().dim()
    }

    fn matrix(&self) -> &EmbeddingMatrix {
        self.store.matrix(self.mode)
    }

    fn check_k(&self, k: usize) -> Result<()> {
        if k == 0 {
            return Err(EmbeddingError::InvalidArgument("k must be at least 1".into()));
        }
        if k > self.len() {
            return Err(EmbeddingError::InvalidArgument(format!(
                "k = {k} exceeds the {} indexed {}",
                self.len(),
                self.mode
            )));
        }
        Ok(())
    }

    /// The `k` nearest rows for each identifier in `query_ids`.
    ///
    /// Result `i` belongs to `query_ids[i]`; within a query hits are ordered
    /// by ascending distance, ties by ascending row. Identifiers are resolved
    /// against the indexed table and any unknown one fails the whole batch.
    pub fn search<S: AsRef<str>>(&self, query_ids: &[S], k: usize) -> Result<SearchResults> {
        self.check_k(k)?;
        let started = Instant::now();
        let rows = self.store.rows_for(self.mode, query_ids)?;
        let matrix = self.matrix();

        let hits: Vec<Vec<Hit>> = rows
            .par_iter()
            .map(|&row| -> Result<Vec<Hit>> {
                let query = matrix.row(row).ok_or(EmbeddingError::IndexOutOfRange {
                    index: row,
                    len: matrix.rows(),
                })?;
                Ok(nearest(matrix, query, k))
            })
            .collect::<Result<_>>()?;

        let mut results = SearchResults {
            ids: Vec::with_capacity(hits.len()),
            distances: Vec::with_capacity(hits.len()),
        };
        for query_hits in hits {
            let hit_rows: Vec<RowIndex> = query_hits.iter().map(|h| h.row).collect();
            results.ids.push(self.store.ids_for_rows(self.mode, &hit_rows)?);
            results
                .distances
                .push(query_hits.iter().map(|h| h.distance).collect());
        }

        debug!(
            mode = %self.mode,
            batch = results.len(),
            k,
            elapsed_us = started.elapsed().as_micros() as u64,
            "nearest-neighbour search"
        );
        Ok(results)
    }

    /// The `k` nearest rows for arbitrary query vectors of the indexed dimension.
    pub fn search_vectors(&self, queries: &EmbeddingMatrix, k: usize) -> Result<Vec<Vec<Hit>>> {
        self.check_k(k)?;
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        if queries.dim() != self.dim() {
            return Err(EmbeddingError::InvalidArgument(format!(
                "query dimension {} does not match index dimension {}",
                queries.dim(),
                self.dim()
            )));
        }
        let matrix = self.matrix();
        Ok(queries
            .as_slice()
            .par_chunks_exact(queries.dim())
            .map(|query| nearest(matrix, query, k))
            .collect())
    }
}

fn by_distance_then_row(a: &Hit, b: &Hit) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.row.cmp(&b.row))
}

/// Flat scan: squared L2 against every row, partial selection of the `k`
/// smallest, then a sort of just those. `k` must be in `1..=matrix.rows()`.
fn nearest(matrix: &EmbeddingMatrix, query: &[f32], k: usize) -> Vec<Hit> {
    let mut scored: Vec<Hit> = matrix
        .iter_rows()
        .enumerate()
        .map(|(row, vector)| Hit {
            row,
            distance: squared_l2(query, vector),
        })
        .collect();

    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, by_distance_then_row);
        scored.truncate(k);
    }
    scored.sort_unstable_by(by_distance_then_row);

    for hit in &mut scored {
        hit.distance = hit.distance.sqrt();
    }
    scored
}
