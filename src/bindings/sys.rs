//! Raw llama.cpp declarations.
//!
//! Pinned to `include/llama.h` of llama.cpp release tag `b5200`
//! ([`LLAMA_CPP_RELEASE`]). The library linked with the `native` feature must
//! be built from that tag: `llama_model_params` crosses the boundary by value,
//! and its field list changes between releases. Older releases exported `llama_load_model_from_file`, `llama_free_model`, `llama_n_vocab`
//! and `llama_n_ctx_train` for the same operations; those symbols are not
//! declared here and no runtime version detection is attempted.
//!
//! The opaque handle types are always compiled so the stub can hand out
//! pointers of the same types. The `extern "C"` block only exists with the
//! `native` feature, where `build.rs` links libllama.

#![allow(non_camel_case_types)]

use std::ffi::c_void;

/// The llama.cpp release whose `llama.h` these declarations match.
pub const LLAMA_CPP_RELEASE: &str = "b5200";

/// Opaque `struct llama_model`.
#[repr(C)]
pub struct llama_model {
    _private: [u8; 0],
}

/// Opaque `struct llama_vocab`.
#[repr(C)]
pub struct llama_vocab {
    _private: [u8; 0],
}

/// Opaque `struct llama_model_kv_override`. Only ever passed as null.
#[repr(C)]
pub struct llama_model_kv_override {
    _private: [u8; 0],
}

/// Opaque `struct llama_model_tensor_buft_override`. Only ever passed as null.
#[repr(C)]
pub struct llama_model_tensor_buft_override {
    _private: [u8; 0],
}

pub type ggml_backend_dev_t = *mut c_void;

pub type llama_progress_callback =
    Option<unsafe extern "C" fn(progress: f32, user_data: *mut c_void) -> bool>;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum llama_split_mode {
    LLAMA_SPLIT_MODE_NONE = 0,
    LLAMA_SPLIT_MODE_LAYER = 1,
    LLAMA_SPLIT_MODE_ROW = 2,
}

/// `struct llama_model_params` as laid out by `llama.h` at [`LLAMA_CPP_RELEASE`].
///
/// Never constructed on the Rust side; values always come from
/// `llama_model_default_params` and are passed back unchanged.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct llama_model_params {
    pub devices: *mut ggml_backend_dev_t,
    pub tensor_buft_overrides: *const llama_model_tensor_buft_override,
    pub n_gpu_layers: i32,
    pub split_mode: llama_split_mode,
    pub main_gpu: i32,
    pub tensor_split: *const f32,
    pub progress_callback: llama_progress_callback,
    pub progress_callback_user_data: *mut c_void,
    pub kv_overrides: *const llama_model_kv_override,
    // Booleans are kept together at the end, matching the C header.
    pub vocab_only: bool,
    pub use_mmap: bool,
    pub use_mlock: bool,
    pub check_tensors: bool,
}

#[cfg(feature = "native")]
extern "C" {
    // Backend
    pub fn llama_backend_init();
    pub fn llama_backend_free();

    // Model
    pub fn llama_model_default_params() -> llama_model_params;
    pub fn llama_model_load_from_file(
        path_model: *const std::ffi::c_char,
        params: llama_model_params,
    ) -> *mut llama_model;
    pub fn llama_model_free(model: *mut llama_model);
    pub fn llama_model_n_ctx_train(model: *const llama_model) -> i32;

    // Vocab
    pub fn llama_model_get_vocab(model: *const llama_model) -> *const llama_vocab;
    pub fn llama_vocab_n_tokens(vocab: *const llama_vocab) -> i32;
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use std::mem::{offset_of, size_of};

    use super::*;

    #[test]
    fn test_model_params_layout() {
        assert_eq!(offset_of!(llama_model_params, n_gpu_layers), 16);
        assert_eq!(offset_of!(llama_model_params, split_mode), 20);
        assert_eq!(offset_of!(llama_model_params, main_gpu), 24);
        assert_eq!(offset_of!(llama_model_params, tensor_split), 32);
        assert_eq!(offset_of!(llama_model_params, kv_overrides), 56);
        assert_eq!(offset_of!(llama_model_params, vocab_only), 64);
        assert_eq!(offset_of!(llama_model_params, check_tensors), 67);
        assert_eq!(size_of::<llama_model_params>(), 72);
    }
}
