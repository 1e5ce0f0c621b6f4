//! Error types for fgnn-nn.

use thiserror::Error;

/// fgnn-nn error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Feature width differs from the one the layer was built for.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Malformed edge index tensor.
    #[error("invalid edge index: {0}")]
    InvalidEdgeIndex(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Activation name that does not resolve.
    #[error("unknown activation: {0}")]
    UnknownActivation(String),

    /// Normalization name that does not resolve.
    #[error("unknown normalization: {0}")]
    UnknownNormalization(String),

    /// Layer name missing from the registry.
    #[error("no layer registered under {0:?}")]
    UnknownLayer(String),

    /// Config file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
