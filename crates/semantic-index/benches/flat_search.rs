use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use embedding_store::{EmbeddingMatrix, EmbeddingStore, IdentifierMap};
use semantic_index::NearestNeighbourIndex;

const DIM: usize = 128;

/// Deterministic pseudo-random rows (xorshift) so runs are comparable.
fn synthetic_index(rows: usize) -> (NearestNeighbourIndex, Vec<String>) {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 40) as f32 / (1u64 << 24) as f32 - 0.5
    };
    let data: Vec<f32> = (0..rows * DIM).map(|_| next()).collect();
    let matrix = EmbeddingMatrix::from_flat(data, rows, DIM).unwrap();
    let ids: Vec<String> = (0..rows).map(|i| format!("Q{i}")).collect();
    let entity_ids = IdentifierMap::from_ordered(ids.clone(), "entities").unwrap();
    let relations = EmbeddingMatrix::from_rows([[0.0f32; DIM]]).unwrap();
    let relation_ids = IdentifierMap::from_ordered(["P31"], "relations").unwrap();
    let store = EmbeddingStore::new(matrix, entity_ids, relations, relation_ids).unwrap();
    (
        NearestNeighbourIndex::build(Arc::new(store), "entities").unwrap(),
        ids,
    )
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_search");
    for rows in [1_000usize, 20_000] {
        let (index, ids) = synthetic_index(rows);
        let batch: Vec<&str> = ids.iter().take(16).map(String::as_str).collect();
        group.bench_with_input(BenchmarkId::new("k11_batch16", rows), &rows, |b, _| {
            b.iter(|| index.search(black_box(&batch), 11).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
