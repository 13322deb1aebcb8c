//! Loaded model handles.

use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::api::{DefaultLlama, LlamaApi};
use super::backend::BackendState;
use super::error::LlamaError;
use super::marshal;
use super::sys::llama_model;

/// Static properties of a loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// File the model was loaded from.
    pub path: PathBuf,

    /// Number of tokens in the vocabulary.
    pub vocab_size: usize,

    /// Context length the model was trained with.
    pub context_size: usize,
}

/// An exclusively owned `llama_model`.
///
/// The native pointer is cleared by [`Model::free`]; every query after that
/// fails with [`LlamaError::InvalidHandle`] without reaching llama.cpp.
/// Dropping a loaded model frees it.
pub struct Model<A: LlamaApi = DefaultLlama> {
    api: Arc<A>,
    ptr: Option<NonNull<llama_model>>,
    path: PathBuf,
    generation: u64,
}

// The pointer is only dereferenced by llama.cpp's read-only getters through
// `&self`, and only released through `&mut self` or drop.
unsafe impl<A: LlamaApi> Send for Model<A> {}
unsafe impl<A: LlamaApi> Sync for Model<A> {}

impl<A: LlamaApi> Model<A> {
    pub(crate) fn new(
        api: Arc<A>,
        ptr: NonNull<llama_model>,
        path: PathBuf,
        generation: u64,
    ) -> Self {
        Self {
            api,
            ptr: Some(ptr),
            path,
            generation,
        }
    }

    /// Number of tokens in the model's vocabulary.
    pub fn vocab_size(&self) -> Result<usize, LlamaError> {
        let model = self.raw()?;
        let vocab = unsafe { self.api.model_get_vocab(model) };
        if vocab.is_null() {
            return Err(LlamaError::NullVocab {
                path: self.path.display().to_string(),
            });
        }
        let n_tokens = unsafe { self.api.vocab_n_tokens(vocab) };
        marshal::native_count("vocab size", n_tokens)
    }

    /// Context length the model was trained with.
    pub fn context_size(&self) -> Result<usize, LlamaError> {
        let model = self.raw()?;
        let n_ctx_train = unsafe { self.api.model_n_ctx_train(model) };
        marshal::native_count("context size", n_ctx_train)
    }

    pub fn info(&self) -> Result<ModelInfo, LlamaError> {
        Ok(ModelInfo {
            path: self.path.clone(),
            vocab_size: self.vocab_size()?,
            context_size: self.context_size()?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.ptr.is_some()
    }

    /// Release the native model. Calling it again is a no-op.
    ///
    /// If the owning backend was dropped while this model was live and this is
    /// the last live model, the backend is shut down as well.
    pub fn free(&mut self) {
        let Some(ptr) = self.ptr.take() else {
            return;
        };

        unsafe { self.api.model_free(ptr.as_ptr()) };
        debug!(path = %self.path.display(), "Model freed");

        let mut slot = self.api.slot().lock();
        if slot.generation != self.generation {
            return;
        }
        slot.live_models = slot.live_models.saturating_sub(1);
        if slot.live_models == 0
            && slot.pending_shutdown
            && slot.state == BackendState::Initialized
        {
            unsafe { self.api.backend_free() };
            slot.state = BackendState::ShutDown;
            slot.pending_shutdown = false;
            info!(
                generation = self.generation,
                "llama backend shut down after last model was freed"
            );
        }
    }

    fn raw(&self) -> Result<*mut llama_model, LlamaError> {
        self.ptr.map(NonNull::as_ptr).ok_or_else(|| LlamaError::InvalidHandle {
            path: self.path.display().to_string(),
        })
    }
}

impl<A: LlamaApi> Drop for Model<A> {
    fn drop(&mut self) {
        if self.is_loaded() {
            if !std::thread::panicking() {
                warn!(
                    path = %self.path.display(),
                    "Model dropped without free; releasing it now"
                );
            }
            self.free();
        }
    }
}

impl<A: LlamaApi> std::fmt::Debug for Model<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CStr;

    use super::*;
    use crate::bindings::backend::{Backend, BackendSlot};
    use crate::bindings::gguf::test_support::ModelFile;
    use crate::bindings::stub::StubLlama;
    use crate::bindings::sys::llama_vocab;

    /// A library whose loads always succeed and whose getters report fixed
    /// values, including the ones llama.cpp returns for a broken model.
    struct FixedLlama {
        slot: BackendSlot,
        null_vocab: bool,
        n_tokens: i32,
        n_ctx_train: i32,
    }

    impl FixedLlama {
        fn new(null_vocab: bool, n_tokens: i32, n_ctx_train: i32) -> Self {
            Self {
                slot: BackendSlot::new(),
                null_vocab,
                n_tokens,
                n_ctx_train,
            }
        }
    }

    impl LlamaApi for FixedLlama {
        fn slot(&self) -> &BackendSlot {
            &self.slot
        }

        unsafe fn backend_init(&self) {}

        unsafe fn backend_free(&self) {}

        unsafe fn model_load_from_file(&self, _path: &CStr) -> *mut llama_model {
            Box::into_raw(Box::new(0u8)).cast()
        }

        unsafe fn model_get_vocab(&self, model: *const llama_model) -> *const llama_vocab {
            if self.null_vocab {
                std::ptr::null()
            } else {
                model.cast()
            }
        }

        unsafe fn vocab_n_tokens(&self, _vocab: *const llama_vocab) -> i32 {
            self.n_tokens
        }

        unsafe fn model_n_ctx_train(&self, _model: *const llama_model) -> i32 {
            self.n_ctx_train
        }

        unsafe fn model_free(&self, model: *mut llama_model) {
            drop(Box::from_raw(model.cast::<u8>()));
        }
    }

    #[test]
    fn test_queries_after_free_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = ModelFile::new("llama", 32000, 2048)
            .write_to(dir.path(), "llama.gguf")
            .unwrap();

        let api = Arc::new(StubLlama::new());
        let backend = Backend::init_shared(api.clone()).unwrap();
        let mut model = backend.load_model(&path).unwrap();
        assert_eq!(model.vocab_size().unwrap(), 32000);

        model.free();
        assert!(!model.is_loaded());
        assert!(matches!(
            model.vocab_size(),
            Err(LlamaError::InvalidHandle { .. })
        ));
        assert!(matches!(
            model.context_size(),
            Err(LlamaError::InvalidHandle { .. })
        ));
        assert_eq!(api.stats().model_frees, 1);
    }

    #[test]
    fn test_free_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = ModelFile::new("llama", 32000, 2048)
            .write_to(dir.path(), "llama.gguf")
            .unwrap();

        let api = Arc::new(StubLlama::new());
        let backend = Backend::init_shared(api.clone()).unwrap();
        let mut model = backend.load_model(&path).unwrap();

        model.free();
        model.free();
        drop(model);

        let stats = api.stats();
        assert_eq!(stats.model_frees, 1);
        assert_eq!(stats.invalid_frees, 0);
        assert_eq!(backend.live_models(), 0);
    }

    #[test]
    fn test_info_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = ModelFile::new("qwen2", 151936, 32768)
            .write_to(dir.path(), "qwen2.gguf")
            .unwrap();

        let backend = Backend::init(StubLlama::new()).unwrap();
        let model = backend.load_model(&path).unwrap();
        let info = model.info().unwrap();

        assert_eq!(info.path, path);
        assert_eq!(info.vocab_size, 151936);
        assert_eq!(info.context_size, 32768);
    }

    #[test]
    fn test_null_vocab_reported() {
        let backend = Backend::init(FixedLlama::new(true, 32000, 2048)).unwrap();
        let mut model = backend.load_model("broken.gguf").unwrap();

        assert_eq!(
            model.vocab_size().unwrap_err(),
            LlamaError::NullVocab {
                path: "broken.gguf".to_string()
            }
        );
        assert_eq!(model.context_size().unwrap(), 2048);
        assert!(matches!(model.info(), Err(LlamaError::NullVocab { .. })));

        model.free();
        assert_eq!(backend.live_models(), 0);
    }

    #[test]
    fn test_non_positive_counts_reported() {
        let backend = Backend::init(FixedLlama::new(false, 0, -1)).unwrap();
        let model = backend.load_model("broken.gguf").unwrap();

        assert_eq!(
            model.vocab_size().unwrap_err(),
            LlamaError::InvalidCount {
                query: "vocab size",
                value: 0
            }
        );
        assert_eq!(
            model.context_size().unwrap_err(),
            LlamaError::InvalidCount {
                query: "context size",
                value: -1
            }
        );
        assert!(!model.info().unwrap_err().is_logic_error());
    }
}
