use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use synckv_core::{diff_leaves, MerkleVariant, RowKey, TreeConfig, VersionStamp};

fn rows(count: u32) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let stamp = VersionStamp {
                wall_clock_millis: 1_700_000_000_000 + i as u64,
                monotonic_nanos: i as u64,
                nonce: 0,
            };
            RowKey::new(format!("key-{:08}", i).as_bytes(), &stamp).into_bytes()
        })
        .collect()
}

fn tree(rows: &[Vec<u8>]) -> MerkleVariant {
    let mut tree = MerkleVariant::new(TreeConfig::default());
    for row in rows {
        tree.add(row);
    }
    tree
}

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle_add");
    for count in [1_000u32, 10_000] {
        let rows = rows(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &rows, |b, rows| {
            b.iter(|| black_box(tree(rows).root_hash()))
        });
    }
    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let rows = rows(10_000);
    let full = tree(&rows);
    c.bench_function("merkle_delete_10000", |b| {
        b.iter_batched(
            || full.clone(),
            |mut tree| {
                for row in &rows {
                    tree.delete(row);
                }
                black_box(tree.key_count())
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_export_and_diff(c: &mut Criterion) {
    let rows = rows(10_000);
    let ours = tree(&rows);
    let theirs = tree(&rows[..rows.len() - 10]);

    c.bench_function("merkle_export_10000", |b| {
        b.iter(|| black_box(ours.export_leaves()))
    });

    let ours_leaves = ours.export_leaves();
    let theirs_leaves = theirs.export_leaves();
    c.bench_function("merkle_diff_10000", |b| {
        b.iter(|| black_box(diff_leaves(&ours_leaves, &theirs_leaves)))
    });
}

criterion_group!(benches, bench_add, bench_delete, bench_export_and_diff);
criterion_main!(benches);
