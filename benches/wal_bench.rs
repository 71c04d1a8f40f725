//! Write-ahead log and transaction throughput benchmarks.
//!
//! Mirrors the benchmark_group/BenchmarkId/Throughput shape used by the
//! retrieval pack's `kv-rs` and `rusty-db` crates: one `criterion_group` per
//! concern, parameterized over payload/batch size.

use collection_store::config::{CollectionConfig, DbConfig};
use collection_store::database::Database;
use collection_store::id_gen::GeneratorRegistry;
use collection_store::txn::{FileWal, WalRecordType, WriteAheadLog};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;

fn make_wal() -> (tempfile::TempDir, FileWal) {
    let dir = tempfile::tempdir().unwrap();
    let wal = FileWal::open(dir.path().join("bench.wal"), collection_store::config::DurabilityLevel::NoSync).unwrap();
    (dir, wal)
}

fn bench_wal_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_write");

    for batch_size in [1usize, 16, 64, 256] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::new("sequential_entries", batch_size), &batch_size, |b, &batch_size| {
            let (_dir, wal) = make_wal();
            let mut txn_id = 0u64;
            b.iter(|| {
                txn_id += 1;
                for _ in 0..batch_size {
                    wal.write(WalRecordType::Data, txn_id, "bench", "insert", black_box(json!({"n": txn_id})))
                        .unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_wal_recover(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_recover");

    for txn_count in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(txn_count as u64));
        group.bench_with_input(BenchmarkId::new("committed_txns", txn_count), &txn_count, |b, &txn_count| {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("recover.wal");
            {
                let wal =
                    FileWal::open(&path, collection_store::config::DurabilityLevel::NoSync).unwrap();
                for txn_id in 0..txn_count as u64 {
                    wal.write(WalRecordType::Begin, txn_id, "bench", "begin", json!(null)).unwrap();
                    wal.write(WalRecordType::Commit, txn_id, "bench", "commit", json!(null)).unwrap();
                }
                wal.close();
            }
            b.iter(|| {
                let wal = FileWal::open(&path, collection_store::config::DurabilityLevel::NoSync).unwrap();
                black_box(wal.recover().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_transactional_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("transactional_insert");

    for doc_count in [10usize, 100, 500] {
        group.throughput(Throughput::Elements(doc_count as u64));
        group.bench_with_input(BenchmarkId::new("commit_per_batch", doc_count), &doc_count, |b, &doc_count| {
            b.iter(|| {
                let mut db = Database::create(
                    "bench",
                    ":memory:",
                    Arc::new(GeneratorRegistry::new()),
                    Arc::new(collection_store::collection::project::ProcessorRegistry::new()),
                    DbConfig::for_testing(),
                )
                .unwrap();
                db.register_collection(CollectionConfig::new("docs")).unwrap();
                db.start_transaction(None, None).unwrap();
                for i in 0..doc_count {
                    db.insert("docs", json!({"n": i}).as_object().unwrap().clone()).unwrap();
                }
                db.commit_transaction().unwrap();
                black_box(db.collection_names());
            });
        });
    }

    group.finish();
}

criterion_group!(wal_benches, bench_wal_write, bench_wal_recover, bench_transactional_insert);
criterion_main!(wal_benches);
