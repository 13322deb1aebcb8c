//! alpaca: minimal safe bindings to llama.cpp.
//!
//! Wraps backend init/teardown, GGUF model loading and two model queries
//! (vocabulary size, training context length). Native handles are owned by
//! Rust values with an explicit, idempotent release; see [`bindings`].
//!
//! Built without the `native` feature the crate runs against
//! [`bindings::StubLlama`], which answers the same queries from the GGUF
//! header alone.

pub mod bindings;
pub mod config;

pub use bindings::{Backend, BackendState, LlamaError, Model, ModelInfo};
