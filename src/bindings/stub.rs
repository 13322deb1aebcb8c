//! Stub llama.cpp.
//!
//! Implements the [`LlamaApi`] contract in Rust by reading the GGUF header of
//! the requested file: the vocabulary comes from `tokenizer.ggml.tokens`, the
//! training context from `<arch>.context_length`. No weights are loaded.
//!
//! Handles are real heap pointers cast to the opaque llama.cpp types, so the
//! lifecycle code above it runs exactly as it does against libllama. Every
//! outstanding allocation is tracked; freeing a pointer the stub does not own
//! is counted and ignored instead of corrupting the heap.

use std::collections::HashSet;
use std::ffi::CStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, warn};

use super::api::LlamaApi;
use super::backend::BackendSlot;
use super::gguf;
use super::marshal;
use super::sys::{llama_model, llama_vocab};

/// Call counters, for tests and `--verbose` diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StubStats {
    pub backend_inits: u64,
    pub backend_frees: u64,
    pub model_loads: u64,
    pub failed_loads: u64,
    pub model_frees: u64,

    /// Frees of pointers that were never handed out or already freed.
    pub invalid_frees: u64,

    /// Models currently allocated.
    pub live_models: usize,
}

struct StubVocab {
    n_tokens: i32,
}

struct StubModel {
    vocab: StubVocab,
    n_ctx_train: i32,
}

#[derive(Default)]
struct StubState {
    stats: StubStats,
    live: HashSet<usize>,
}

/// In-process stand-in for libllama; see the module docs.
pub struct StubLlama {
    slot: BackendSlot,
    state: Mutex<StubState>,
}

impl StubLlama {
    pub fn new() -> Self {
        Self {
            slot: BackendSlot::new(),
            state: Mutex::new(StubState::default()),
        }
    }

    pub fn stats(&self) -> StubStats {
        let state = self.lock();
        StubStats {
            live_models: state.live.len(),
            ..state.stats
        }
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_model(path: &CStr) -> Option<StubModel> {
        let path = marshal::cstr_to_path(path);
        let header = match gguf::read_header(&path) {
            Ok(header) => header,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "stub: failed to read GGUF header");
                return None;
            }
        };

        let n_tokens = header.vocab_size().and_then(|n| i32::try_from(n).ok());
        let n_ctx_train = header.context_length().and_then(|n| i32::try_from(n).ok());
        match (n_tokens, n_ctx_train) {
            (Some(n_tokens), Some(n_ctx_train)) => Some(StubModel {
                vocab: StubVocab { n_tokens },
                n_ctx_train,
            }),
            _ => {
                warn!(
                    path = %path.display(),
                    "stub: GGUF header lacks vocabulary or context length"
                );
                None
            }
        }
    }
}

impl Default for StubLlama {
    fn default() -> Self {
        Self::new()
    }
}

impl LlamaApi for StubLlama {
    fn slot(&self) -> &BackendSlot {
        &self.slot
    }

    unsafe fn backend_init(&self) {
        self.lock().stats.backend_inits += 1;
    }

    unsafe fn backend_free(&self) {
        self.lock().stats.backend_frees += 1;
    }

    unsafe fn model_load_from_file(&self, path: &CStr) -> *mut llama_model {
        let Some(model) = Self::read_model(path) else {
            self.lock().stats.failed_loads += 1;
            return std::ptr::null_mut();
        };

        let ptr = Box::into_raw(Box::new(model));
        let mut state = self.lock();
        state.stats.model_loads += 1;
        state.live.insert(ptr as usize);
        debug!(ptr = ptr as usize, "stub: model allocated");
        ptr.cast::<llama_model>()
    }

    unsafe fn model_get_vocab(&self, model: *const llama_model) -> *const llama_vocab {
        let model = model.cast::<StubModel>();
        std::ptr::addr_of!((*model).vocab).cast::<llama_vocab>()
    }

    unsafe fn vocab_n_tokens(&self, vocab: *const llama_vocab) -> i32 {
        (*vocab.cast::<StubVocab>()).n_tokens
    }

    unsafe fn model_n_ctx_train(&self, model: *const llama_model) -> i32 {
        (*model.cast::<StubModel>()).n_ctx_train
    }

    unsafe fn model_free(&self, model: *mut llama_model) {
        let mut state = self.lock();
        if !state.live.remove(&(model as usize)) {
            state.stats.invalid_frees += 1;
            warn!(ptr = model as usize, "stub: free of unknown model pointer ignored");
            return;
        }
        state.stats.model_frees += 1;
        drop(state);

        drop(Box::from_raw(model.cast::<StubModel>()));
        debug!(ptr = model as usize, "stub: model released");
    }
}
