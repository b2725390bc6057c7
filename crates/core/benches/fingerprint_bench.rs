//! Fingerprint capture and comparison benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use settle_core::{capture, CaptureOptions, SignatureMode};
use std::fs;
use std::path::Path;

fn populate(root: &Path, dirs: usize, files_per_dir: usize) {
    for d in 0..dirs {
        let dir = root.join(format!("dir_{:03}", d));
        fs::create_dir_all(&dir).unwrap();
        for f in 0..files_per_dir {
            fs::write(dir.join(format!("file_{:03}.txt", f)), vec![b'x'; 256]).unwrap();
        }
    }
}

fn bench_capture(c: &mut Criterion) {
    let temp_dir = tempfile::tempdir().unwrap();
    populate(temp_dir.path(), 20, 50);

    let metadata = CaptureOptions::recursive();
    c.bench_function("capture_1000_files_metadata", |b| {
        b.iter(|| black_box(capture(temp_dir.path(), &metadata).unwrap()))
    });

    let hashed = CaptureOptions {
        signature: SignatureMode::ContentHash,
        ..CaptureOptions::recursive()
    };
    c.bench_function("capture_1000_files_content_hash", |b| {
        b.iter(|| black_box(capture(temp_dir.path(), &hashed).unwrap()))
    });
}

fn bench_compare(c: &mut Criterion) {
    let temp_dir = tempfile::tempdir().unwrap();
    populate(temp_dir.path(), 20, 50);
    let options = CaptureOptions::recursive();
    let a = capture(temp_dir.path(), &options).unwrap();
    let b = capture(temp_dir.path(), &options).unwrap();

    c.bench_function("compare_1000_entries", |bench| {
        bench.iter(|| black_box(a.changed_from(&b)))
    });
    c.bench_function("diff_1000_entries", |bench| {
        bench.iter(|| black_box(a.diff_from(&b)))
    });
}

criterion_group!(benches, bench_capture, bench_compare);
criterion_main!(benches);
