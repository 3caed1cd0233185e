//! Benchmarks for s3-tree-sync
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn benchmark_digest(c: &mut Criterion) {
    use s3_tree_sync::content::{digest_bytes, digest_reader};

    let data = vec![0xA5u8; 4 * 1024 * 1024];

    let mut group = c.benchmark_group("digest");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("digest_bytes_4mib", |b| {
        b.iter(|| black_box(digest_bytes(black_box(&data))))
    });

    group.bench_function("digest_reader_4mib", |b| {
        b.iter(|| black_box(digest_reader(black_box(&data[..])).unwrap()))
    });

    group.finish();
}

fn benchmark_metadata_codec(c: &mut Criterion) {
    use s3_tree_sync::compare::Comparator;
    use s3_tree_sync::content::digest_bytes;
    use s3_tree_sync::fs::LocalStat;
    use s3_tree_sync::metadata::{encode_digests, FileAttributes, RootSquash};
    use s3_tree_sync::store::ObjectHeader;

    let stat = LocalStat {
        size: 4096,
        mode: 0o100644,
        uid: 0,
        gid: 1000,
        ctime_ns: 1_700_000_000_123_456_789,
        mtime_ns: 1_700_000_000_987_654_321,
    };
    let squash = Some(RootSquash {
        uid: 65534,
        gid: 65534,
    });
    let hashes = digest_bytes(b"benchmark payload");

    c.bench_function("metadata_encode", |b| {
        b.iter(|| {
            let mut map = FileAttributes::from_stat(black_box(&stat), squash).encode();
            encode_digests(&mut map, &hashes);
            black_box(map)
        })
    });

    let header = ObjectHeader {
        content_length: stat.size,
        metadata: FileAttributes::from_stat(&stat, squash).encode(),
        ..Default::default()
    };
    let comparator = Comparator::new(squash, false);

    c.bench_function("metadata_compare", |b| {
        b.iter(|| black_box(comparator.metadata_mismatch(black_box(&stat), &header, false)))
    });
}

criterion_group!(benches, benchmark_digest, benchmark_metadata_codec);
criterion_main!(benches);
