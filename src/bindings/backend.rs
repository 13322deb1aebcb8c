//! Process-wide backend lifecycle.
//!
//! llama.cpp keeps global state set up by `llama_backend_init` and torn down
//! by `llama_backend_free`. The library itself does not guard against double
//! init, shutdown before init, or shutdown with models still loaded, so the
//! [`BackendSlot`] owned by each [`LlamaApi`] implementation tracks it here.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::api::{DefaultLlama, LlamaApi};
use super::error::LlamaError;
use super::marshal;
use super::model::Model;

/// Lifecycle state of a native backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    Uninitialized,
    Initialized,
    ShutDown,
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendState::Uninitialized => write!(f, "uninitialized"),
            BackendState::Initialized => write!(f, "initialized"),
            BackendState::ShutDown => write!(f, "shut down"),
        }
    }
}

/// The single backend state of one native library.
#[derive(Debug)]
pub struct BackendSlot {
    inner: Mutex<SlotInner>,
}

#[derive(Debug)]
pub(crate) struct SlotInner {
    pub(crate) state: BackendState,

    /// Bumped on every successful init; identifies one init/shutdown cycle.
    pub(crate) generation: u64,

    /// Models loaded during the current generation and not yet freed.
    pub(crate) live_models: usize,

    /// Set when the owning [`Backend`] was dropped while models were live.
    pub(crate) pending_shutdown: bool,
}

impl SlotInner {
    pub(crate) fn is_live(&self, generation: u64) -> bool {
        self.state == BackendState::Initialized && self.generation == generation
    }
}

impl BackendSlot {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                state: BackendState::Uninitialized,
                generation: 0,
                live_models: 0,
                pending_shutdown: false,
            }),
        }
    }

    // A panic while holding the lock cannot leave the counters half-written,
    // so a poisoned lock is still usable.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, regardless of which generation it belongs to.
    pub fn state(&self) -> BackendState {
        self.lock().state
    }

    /// Models loaded and not yet freed.
    pub fn live_models(&self) -> usize {
        self.lock().live_models
    }
}

impl Default for BackendSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Token for an initialized backend; models are loaded through it.
///
/// Dropping a `Backend` shuts it down if [`Backend::shutdown`] was not called.
/// If models are still live at that point the native shutdown is deferred
/// until the last of them is freed.
pub struct Backend<A: LlamaApi = DefaultLlama> {
    api: Arc<A>,
    generation: u64,
}

impl Backend<DefaultLlama> {
    /// Initialize the default native library for this build.
    pub fn init_default() -> Result<Self, LlamaError> {
        Self::init(DefaultLlama::default())
    }
}

impl<A: LlamaApi> Backend<A> {
    /// Initialize the backend of `api`.
    ///
    /// Fails with [`LlamaError::BackendAlreadyInitialized`] if it is already
    /// initialized. A backend that completed its shutdown can be initialized
    /// again; handles from the earlier cycle stay invalid.
    pub fn init(api: A) -> Result<Self, LlamaError> {
        Self::init_shared(Arc::new(api))
    }

    /// Like [`Backend::init`], for an `api` the caller keeps a handle to.
    pub fn init_shared(api: Arc<A>) -> Result<Self, LlamaError> {
        let mut slot = api.slot().lock();
        if slot.state == BackendState::Initialized {
            return Err(LlamaError::BackendAlreadyInitialized);
        }

        unsafe { api.backend_init() };

        slot.state = BackendState::Initialized;
        slot.generation += 1;
        slot.live_models = 0;
        slot.pending_shutdown = false;
        let generation = slot.generation;
        drop(slot);

        info!(generation, "llama backend initialized");
        Ok(Self { api, generation })
    }

    /// Load a GGUF model with llama.cpp's default model parameters.
    ///
    /// Blocks the calling thread for the whole load, which can take seconds
    /// for large files.
    pub fn load_model(&self, path: impl AsRef<Path>) -> Result<Model<A>, LlamaError> {
        let path = path.as_ref();
        self.ensure_live()?;

        let start = Instant::now();
        let ptr = {
            let c_path = marshal::path_to_cstring(path)?;
            unsafe { self.api.model_load_from_file(&c_path) }
        };

        let Some(ptr) = std::ptr::NonNull::new(ptr) else {
            warn!(path = %path.display(), "llama.cpp failed to load model");
            return Err(LlamaError::ModelLoad {
                path: path.display().to_string(),
            });
        };

        let mut slot = self.api.slot().lock();
        if !slot.is_live(self.generation) {
            // Shut down while the load was running.
            drop(slot);
            unsafe { self.api.model_free(ptr.as_ptr()) };
            return Err(LlamaError::BackendNotInitialized);
        }
        slot.live_models += 1;
        let live_models = slot.live_models;
        drop(slot);

        info!(
            path = %path.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            live_models,
            "Model loaded"
        );

        Ok(Model::new(
            self.api.clone(),
            ptr,
            path.to_path_buf(),
            self.generation,
        ))
    }

    /// Release the native backend.
    ///
    /// Refused with [`LlamaError::ModelsStillLive`] until every model loaded
    /// through it has been freed, and with
    /// [`LlamaError::BackendNotInitialized`] when already shut down.
    pub fn shutdown(&mut self) -> Result<(), LlamaError> {
        let mut slot = self.api.slot().lock();
        if !slot.is_live(self.generation) {
            return Err(LlamaError::BackendNotInitialized);
        }
        if slot.live_models > 0 {
            return Err(LlamaError::ModelsStillLive {
                count: slot.live_models,
            });
        }

        unsafe { self.api.backend_free() };
        slot.state = BackendState::ShutDown;
        drop(slot);

        info!(generation = self.generation, "llama backend shut down");
        Ok(())
    }

    /// State of this backend. A handle from an earlier init/shutdown cycle
    /// reports [`BackendState::ShutDown`].
    pub fn state(&self) -> BackendState {
        let slot = self.api.slot().lock();
        if slot.generation == self.generation {
            slot.state
        } else {
            BackendState::ShutDown
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.api.slot().lock().is_live(self.generation)
    }

    /// Models loaded through this backend and not yet freed.
    pub fn live_models(&self) -> usize {
        let slot = self.api.slot().lock();
        if slot.generation == self.generation {
            slot.live_models
        } else {
            0
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn ensure_live(&self) -> Result<(), LlamaError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(LlamaError::BackendNotInitialized)
        }
    }
}

impl<A: LlamaApi> Drop for Backend<A> {
    fn drop(&mut self) {
        let mut slot = self.api.slot().lock();
        if !slot.is_live(self.generation) {
            return;
        }

        if slot.live_models == 0 {
            unsafe { self.api.backend_free() };
            slot.state = BackendState::ShutDown;
            debug!(generation = self.generation, "llama backend shut down on drop");
        } else {
            slot.pending_shutdown = true;
            warn!(
                live_models = slot.live_models,
                "Backend dropped with live models; shutdown deferred until the last model is freed"
            );
        }
    }
}

impl<A: LlamaApi> std::fmt::Debug for Backend<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("generation", &self.generation)
            .field("state", &self.state())
            .finish()
    }
}
