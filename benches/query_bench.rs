//! Benchmarks for the binding overhead around native calls.

use std::path::{Path, PathBuf};

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use alpaca::bindings::gguf;
use alpaca::bindings::gguf::test_support::ModelFile;
use alpaca::bindings::marshal::path_to_cstring;
use alpaca::bindings::{Backend, StubLlama};

/// A llama-style header with a 32000-entry token array.
fn write_header(dir: &Path) -> PathBuf {
    ModelFile::new("llama", 32000, 2048)
        .write_to(dir, "bench.gguf")
        .unwrap()
}

fn bench_queries(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_header(dir.path());

    let backend = Backend::init(StubLlama::new()).unwrap();
    let model = backend.load_model(&path).unwrap();

    c.bench_function("vocab_size", |b| {
        b.iter(|| black_box(model.vocab_size().unwrap()))
    });

    c.bench_function("context_size", |b| {
        b.iter(|| black_box(model.context_size().unwrap()))
    });
}

fn bench_marshal_path(c: &mut Criterion) {
    let path = PathBuf::from("/var/lib/models/tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf");

    c.bench_function("path_to_cstring", |b| {
        b.iter(|| black_box(path_to_cstring(black_box(&path)).unwrap()))
    });
}

fn bench_header_parse(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_header(dir.path());

    c.bench_function("gguf_header_32k_tokens", |b| {
        b.iter(|| black_box(gguf::read_header(&path).unwrap()))
    });
}

criterion_group!(benches, bench_queries, bench_marshal_path, bench_header_parse);
criterion_main!(benches);
