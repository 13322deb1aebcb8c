use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlamaError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Path cannot be passed to llama.cpp: {0}")]
    InvalidPath(String),

    #[error("Failed to load model: {path}")]
    ModelLoad { path: String },

    #[error("Model handle for {path} has already been freed")]
    InvalidHandle { path: String },

    #[error("llama.cpp returned a null vocabulary for {path}")]
    NullVocab { path: String },

    #[error("llama.cpp returned an invalid {query}: {value}")]
    InvalidCount { query: &'static str, value: i32 },

    #[error("llama backend is already initialized")]
    BackendAlreadyInitialized,

    #[error("llama backend is not initialized")]
    BackendNotInitialized,

    #[error("llama backend still has {count} live model(s)")]
    ModelsStillLive { count: usize },
}

impl LlamaError {
    /// Lifecycle and handle misuse, as opposed to failures caused by input.
    pub fn is_logic_error(&self) -> bool {
        matches!(
            self,
            LlamaError::InvalidHandle { .. }
                | LlamaError::BackendAlreadyInitialized
                | LlamaError::BackendNotInitialized
                | LlamaError::ModelsStillLive { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_load_message_carries_path() {
        let err = LlamaError::ModelLoad {
            path: "/models/missing.gguf".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to load model: /models/missing.gguf");
        assert!(!err.is_logic_error());
    }

    #[test]
    fn test_lifecycle_errors_are_logic_errors() {
        assert!(LlamaError::BackendNotInitialized.is_logic_error());
        assert!(LlamaError::ModelsStillLive { count: 2 }.is_logic_error());
        assert!(!LlamaError::Configuration("no model".into()).is_logic_error());
    }
}
