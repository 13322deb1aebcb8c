//! The native entry points the bindings depend on.
//!
//! [`LlamaApi`] is the seam between the safe lifecycle code and whatever
//! implements the llama.cpp ABI: the linked library ([`LinkedLlama`], `native`
//! feature) or the GGUF metadata stub ([`StubLlama`](super::stub::StubLlama)).

use std::ffi::CStr;

use super::backend::BackendSlot;
use super::sys::{llama_model, llama_vocab};

#[cfg(not(feature = "native"))]
pub use super::stub::StubLlama as DefaultLlama;
#[cfg(feature = "native")]
pub use self::LinkedLlama as DefaultLlama;

/// The subset of `llama.h` wrapped by this crate.
///
/// Every pointer-taking method mirrors a C function with the same contract:
/// pointers must come from this same implementation and must still be live.
/// Implementations are process-wide from the native library's point of view;
/// [`LlamaApi::slot`] is where the one backend state for that library lives.
pub trait LlamaApi: Send + Sync + 'static {
    /// Backend state shared by every handle created through this library.
    fn slot(&self) -> &BackendSlot;

    /// `llama_backend_init`.
    ///
    /// # Safety
    /// Must not run concurrently with any other call into the library.
    unsafe fn backend_init(&self);

    /// `llama_backend_free`.
    ///
    /// # Safety
    /// No model may be live and no other call may be in flight.
    unsafe fn backend_free(&self);

    /// `llama_model_load_from_file` with `llama_model_default_params()`.
    ///
    /// Returns null on failure.
    ///
    /// # Safety
    /// The backend must be initialized.
    unsafe fn model_load_from_file(&self, path: &CStr) -> *mut llama_model;

    /// `llama_model_get_vocab`.
    ///
    /// # Safety
    /// `model` must be a live pointer returned by `model_load_from_file`.
    unsafe fn model_get_vocab(&self, model: *const llama_model) -> *const llama_vocab;

    /// `llama_vocab_n_tokens`.
    ///
    /// # Safety
    /// `vocab` must come from `model_get_vocab` on a model that is still live.
    unsafe fn vocab_n_tokens(&self, vocab: *const llama_vocab) -> i32;

    /// `llama_model_n_ctx_train`.
    ///
    /// # Safety
    /// `model` must be a live pointer returned by `model_load_from_file`.
    unsafe fn model_n_ctx_train(&self, model: *const llama_model) -> i32;

    /// `llama_model_free`.
    ///
    /// # Safety
    /// `model` must be live and must not be used again afterwards.
    unsafe fn model_free(&self, model: *mut llama_model);
}

/// The llama.cpp library linked by `build.rs`.
#[cfg(feature = "native")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedLlama;

#[cfg(feature = "native")]
static NATIVE_SLOT: BackendSlot = BackendSlot::new();

#[cfg(feature = "native")]
impl LlamaApi for LinkedLlama {
    fn slot(&self) -> &BackendSlot {
        &NATIVE_SLOT
    }

    unsafe fn backend_init(&self) {
        super::sys::llama_backend_init();
    }

    unsafe fn backend_free(&self) {
        super::sys::llama_backend_free();
    }

    unsafe fn model_load_from_file(&self, path: &CStr) -> *mut llama_model {
        let params = super::sys::llama_model_default_params();
        super::sys::llama_model_load_from_file(path.as_ptr(), params)
    }

    unsafe fn model_get_vocab(&self, model: *const llama_model) -> *const llama_vocab {
        super::sys::llama_model_get_vocab(model)
    }

    unsafe fn vocab_n_tokens(&self, vocab: *const llama_vocab) -> i32 {
        super::sys::llama_vocab_n_tokens(vocab)
    }

    unsafe fn model_n_ctx_train(&self, model: *const llama_model) -> i32 {
        super::sys::llama_model_n_ctx_train(model)
    }

    unsafe fn model_free(&self, model: *mut llama_model) {
        super::sys::llama_model_free(model);
    }
}
