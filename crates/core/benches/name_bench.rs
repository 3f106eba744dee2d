//! Name conversion and path search benchmarks for localfs-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use localfs_core::fs::{self, FileSystemAccess};
use localfs_core::{LocalPath, NativeFileSystemAccess};

fn bench_escaping(c: &mut Criterion) {
    let plain = "quarterly report final v2.xlsx";
    let hostile = "a:b*c?d<e>f|g\"h\\i/j";
    let escaped = fs::escape_fs_incompatible(hostile);

    c.bench_function("escape_plain", |b| {
        b.iter(|| fs::escape_fs_incompatible(black_box(plain)))
    });

    c.bench_function("escape_incompatible", |b| {
        b.iter(|| fs::escape_fs_incompatible(black_box(hostile)))
    });

    c.bench_function("unescape_incompatible", |b| {
        b.iter(|| fs::unescape_fs_incompatible(black_box(&escaped)))
    });
}

fn bench_normalize(c: &mut Criterion) {
    let decomposed = "Cafe\u{301} na\u{308}ive re\u{301}sume\u{301}".repeat(8);
    let with_nuls = format!("{}\0{}\0", decomposed, decomposed);

    c.bench_function("normalize_decomposed", |b| {
        b.iter(|| {
            let mut buf = decomposed.clone().into_bytes();
            fs::normalize(black_box(&mut buf));
            buf
        })
    });

    c.bench_function("normalize_nul_runs", |b| {
        b.iter(|| {
            let mut buf = with_nuls.clone().into_bytes();
            fs::normalize(black_box(&mut buf));
            buf
        })
    });
}

fn bench_path_search(c: &mut Criterion) {
    let native = NativeFileSystemAccess::without_async();
    let deep = (0..32).map(|i| format!("dir{}", i)).collect::<Vec<_>>().join("/");
    let path = LocalPath::from_path(&format!("/{}/leaf.txt", deep), &native);

    c.bench_function("leaf_name_deep", |b| {
        b.iter(|| black_box(&path).leaf_name_byte_index(&native))
    });

    c.bench_function("name2local_local2name", |b| {
        b.iter(|| {
            let local = native.name2local(black_box("report: draft?"));
            native.local2name(&local)
        })
    });
}

criterion_group!(benches, bench_escaping, bench_normalize, bench_path_search);
criterion_main!(benches);
