//! Central error types for memprofile-oxidized.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilerError {
    /// A flattened submodule exposes no lifecycle hook points.
    #[error("Module {index} ({layer_type}) does not support lifecycle hooks")]
    UnsupportedModule { index: usize, layer_type: String },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
