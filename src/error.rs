//! Error types for layer construction and execution.

use thiserror::Error;

/// Result type alias for fallible layer operations.
pub type Result<T> = std::result::Result<T, BnnError>;

/// Errors raised while building, running or (de)serialising layers.
///
/// Kernel-level shape violations inside [`crate::ops`] still panic; layers check
/// shapes up front and report them through this type instead.
#[derive(Debug, Error)]
pub enum BnnError {
    /// Input has the wrong number of axes.
    #[error("input rank must be at least {expected}, got {actual}")]
    InvalidRank {
        /// Minimum (or exact, for convolutions) rank.
        expected: usize,
        /// Rank that was supplied.
        actual: usize,
    },

    /// Convolution input has no defined channel dimension.
    #[error("the channel dimension of the inputs should be defined, found `None` at axis {axis}")]
    UndefinedChannel {
        /// Channel axis for the configured data format.
        axis: usize,
    },

    /// Dense input has no defined feature dimension.
    #[error("the last dimension of the inputs should be defined, found `None` at axis {axis}")]
    UndefinedDimension {
        /// Feature axis.
        axis: usize,
    },

    /// A tensor does not have the shape it was expected to have.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// Resolved scale factor is unusable.
    #[error("scale factor H must be finite and positive, got {0}")]
    InvalidScale(f32),

    /// Invalid configuration parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Convolution geometry leaves no spatial output.
    #[error("convolution produces an empty output for input {input:?}")]
    EmptyOutput {
        /// Input shape that was convolved.
        input: Vec<usize>,
    },

    /// Config (de)serialisation failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
