use core_types::RowIndex;

use crate::error::{EmbeddingError, Result};

const IN_MEMORY: &str = "<in-memory>";

/// Dense row-major `rows x dim` matrix of f32 embeddings.
///
/// There is deliberately no `&mut` accessor: once built, a matrix is shared
/// read-only between the store, the index, and request handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    data: Vec<f32>,
    rows: usize,
    dim: usize,
}

impl EmbeddingMatrix {
    /// Wrap a flat row-major buffer, checking it matches the declared shape.
    pub fn from_flat(data: Vec<f32>, rows: usize, dim: usize) -> Result<Self> {
        let expected = rows
            .checked_mul(dim)
            .ok_or_else(|| EmbeddingError::malformed(IN_MEMORY, "shape overflows usize"))?;
        if data.len() != expected {
            return Err(EmbeddingError::malformed(
                IN_MEMORY,
                format!(
                    "buffer holds {} values but shape ({rows}, {dim}) needs {expected}",
                    data.len()
                ),
            ));
        }
        if dim == 0 && rows > 0 {
            return Err(EmbeddingError::malformed(
                IN_MEMORY,
                "rows must have at least one dimension",
            ));
        }
        Ok(Self { data, rows, dim })
    }

    /// Build from individual rows; all rows must share one length.
    pub fn from_rows<I>(rows: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<[f32]>,
    {
        let mut data = Vec::new();
        let mut dim = None;
        let mut count = 0usize;
        for row in rows {
            let row = row.as_ref();
            match dim {
                None => dim = Some(row.len()),
                Some(d) if d != row.len() => {
                    return Err(EmbeddingError::malformed(
                        IN_MEMORY,
                        format!("row {count} has {} values, expected {d}", row.len()),
                    ));
                }
                Some(_) => {}
            }
            data.extend_from_slice(row);
            count += 1;
        }
        Self::from_flat(data, count, dim.unwrap_or(0))
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, index: RowIndex) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.dim;
        Some(&self.data[start..start + self.dim])
    }

    pub fn iter_rows(&self) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        // dim is only zero for the empty matrix, where chunk size is irrelevant.
        self.data.chunks_exact(self.dim.max(1))
    }

    /// Copy the given rows, in the given order, into a new matrix.
    pub fn gather(&self, indices: &[RowIndex]) -> Result<Self> {
        let mut data = Vec::with_capacity(indices.len() * self.dim);
        for &index in indices {
            let row = self.row(index).ok_or(EmbeddingError::IndexOutOfRange {
                index,
                len: self.rows,
            })?;
            data.extend_from_slice(row);
        }
        Ok(Self {
            data,
            rows: indices.len(),
            dim: self.dim,
        })
    }
}

/// Squared Euclidean distance. Slices must have equal length.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Euclidean (L2) distance; the unit every public distance uses.
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    squared_l2(a, b).sqrt()
}
