//! Synthetic GGUF files for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use alpaca::bindings::gguf::test_support::{nested_array_header, ModelFile};

/// A Q4_K_M llama.cpp model header with the given shape.
pub fn write_model(
    dir: &Path,
    file_name: &str,
    arch: &str,
    name: &str,
    n_vocab: u32,
    n_ctx: u32,
) -> PathBuf {
    ModelFile::new(arch, n_vocab, n_ctx)
        .name(name)
        .file_type(15)
        .write_to(dir, file_name)
        .unwrap()
}

/// Header metadata of TinyLlama-1.1B-Chat v1.0: 32000 tokens, 2048 context.
pub fn write_tinyllama(dir: &Path) -> PathBuf {
    write_model(
        dir,
        "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
        "llama",
        "tinyllama_tinyllama-1.1b-chat-v1.0",
        32000,
        2048,
    )
}

/// A header whose single key is `depth` arrays nested inside each other.
pub fn write_nested_arrays(dir: &Path, depth: u32) -> PathBuf {
    let path = dir.join("nested.gguf");
    std::fs::write(&path, nested_array_header(depth)).unwrap();
    path
}
