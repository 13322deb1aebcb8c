//! Conversions between Rust values and what llama.cpp expects.
//!
//! Paths go in as NUL-terminated byte strings owned by the caller for the
//! duration of a single native call; integers come back as C `int32_t` and
//! are checked before they become Rust sizes.

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::LlamaError;

/// Convert a path into a NUL-terminated buffer for a single native call.
///
/// The returned `CString` must outlive the call that receives its pointer and
/// is released when it goes out of scope, on success and error paths alike.
pub fn path_to_cstring(path: &Path) -> Result<CString, LlamaError> {
    let bytes = path_bytes(path)?;
    let c_path = CString::new(bytes).map_err(|e| {
        LlamaError::InvalidPath(format!(
            "{} contains a NUL byte at offset {}",
            path.display(),
            e.nul_position()
        ))
    })?;
    debug!(path = %path.display(), len = c_path.as_bytes().len(), "Marshaled model path");
    Ok(c_path)
}

/// Inverse of [`path_to_cstring`].
pub fn cstr_to_path(c_path: &CStr) -> PathBuf {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        PathBuf::from(std::ffi::OsStr::from_bytes(c_path.to_bytes()))
    }

    #[cfg(not(unix))]
    {
        PathBuf::from(c_path.to_string_lossy().into_owned())
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Result<Vec<u8>, LlamaError> {
    use std::os::unix::ffi::OsStrExt;
    Ok(path.as_os_str().as_bytes().to_vec())
}

// llama.cpp opens files through fopen/std::ifstream, which take UTF-8 on the
// platforms we build for outside Unix.
#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Result<Vec<u8>, LlamaError> {
    path.to_str()
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| LlamaError::InvalidPath(format!("{} is not valid UTF-8", path.display())))
}

/// Check a count returned by llama.cpp and widen it.
pub fn native_count(query: &'static str, value: i32) -> Result<usize, LlamaError> {
    usize::try_from(value)
        .ok()
        .filter(|&n| n > 0)
        .ok_or(LlamaError::InvalidCount { query, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_is_nul_terminated() {
        let c_path = path_to_cstring(Path::new("/models/tiny.gguf")).unwrap();
        assert_eq!(c_path.as_bytes_with_nul(), b"/models/tiny.gguf\0");
    }

    #[test]
    fn test_interior_nul_rejected() {
        let err = path_to_cstring(Path::new("/models/ti\0ny.gguf")).unwrap_err();
        match err {
            LlamaError::InvalidPath(msg) => assert!(msg.contains("offset 10")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_path_roundtrip_through_cstr() {
        let path = Path::new("relative/dir with spaces/model.gguf");
        let c_path = path_to_cstring(path).unwrap();
        assert_eq!(cstr_to_path(&c_path), path);
    }

    #[test]
    fn test_native_count() {
        assert_eq!(native_count("vocab size", 32000).unwrap(), 32000);
        assert_eq!(
            native_count("context size", -1).unwrap_err(),
            LlamaError::InvalidCount {
                query: "context size",
                value: -1
            }
        );
        assert!(native_count("vocab size", 0).is_err());
    }
}
