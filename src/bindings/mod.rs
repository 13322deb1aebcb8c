//! Safe bindings to the llama.cpp C API.
//!
//! - [`backend`]: process-wide backend init/shutdown
//! - [`model`]: loaded model handles and introspection
//! - [`api`]: the native entry points, linked or stubbed
//! - [`marshal`]: path and integer conversion across the FFI boundary
//! - [`gguf`]: GGUF header reader
//! - [`stub`]: pure-Rust stand-in for libllama
//! - [`sys`]: raw `llama.h` declarations

pub mod api;
pub mod backend;
pub mod error;
pub mod gguf;
pub mod marshal;
pub mod model;
pub mod stub;
pub mod sys;

pub use api::{DefaultLlama, LlamaApi};
pub use backend::{Backend, BackendSlot, BackendState};
pub use error::LlamaError;
pub use model::{Model, ModelInfo};
pub use stub::{StubLlama, StubStats};

#[cfg(feature = "native")]
pub use api::LinkedLlama;
