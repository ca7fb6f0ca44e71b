use std::fs;
use std::path::Path;

use core_types::RowIndex;
use indexmap::IndexSet;

use crate::error::{EmbeddingError, Result};

/// Ordered, unique identifiers: position in the set is the matrix row.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    ids: IndexSet<String, ahash::RandomState>,
}

impl IdentifierMap {
    /// Build from identifiers already in row order. Duplicates are rejected.
    pub fn from_ordered<I, S>(ids: I, artifact: &str) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set: IndexSet<String, ahash::RandomState> =
            IndexSet::with_hasher(ahash::RandomState::new());
        for (row, id) in ids.into_iter().enumerate() {
            let (first, inserted) = set.insert_full(id.into());
            if !inserted {
                return Err(EmbeddingError::malformed(
                    artifact,
                    format!(
                        "identifier {:?} at row {row} duplicates row {first}",
                        set[first]
                    ),
                ));
            }
        }
        Ok(Self { ids: set })
    }

    /// Parse `<row_index>\t<identifier>` lines in ascending row order.
    pub fn parse_tsv(text: &str, artifact: &str) -> Result<Self> {
        let mut lines: Vec<&str> = text.split('\n').collect();
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        let mut set: IndexSet<String, ahash::RandomState> =
            IndexSet::with_capacity_and_hasher(lines.len(), ahash::RandomState::new());
        for (expected, raw) in lines.into_iter().enumerate() {
            let line_no = expected + 1;
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            let bad = |reason: String| {
                EmbeddingError::malformed(artifact, format!("line {line_no}: {reason}"))
            };

            let (index, id) = line
                .split_once('\t')
                .ok_or_else(|| bad("expected `<row_index>\\t<identifier>`".into()))?;
            let index: RowIndex = index
                .parse()
                .map_err(|_| bad(format!("row index {index:?} is not a non-negative integer")))?;
            if index != expected {
                return Err(bad(format!(
                    "row index {index} out of sequence, expected {expected}"
                )));
            }
            if id.is_empty() {
                return Err(bad("empty identifier".into()));
            }
            let (first, inserted) = set.insert_full(id.to_string());
            if !inserted {
                return Err(bad(format!("identifier {id:?} duplicates row {first}")));
            }
        }
        Ok(Self { ids: set })
    }

    pub fn load_tsv(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            EmbeddingError::malformed(path.display(), format!("cannot read identifier file: {e}"))
        })?;
        Self::parse_tsv(&text, &path.display().to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn row_of(&self, id: &str) -> Option<RowIndex> {
        self.ids.get_index_of(id)
    }

    pub fn id_at(&self, row: RowIndex) -> Option<&str> {
        self.ids.get_index(row).map(String::as_str)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.ids.iter().map(String::as_str)
    }
}
