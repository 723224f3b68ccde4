//! Error types for the fused cross-entropy operations.

use thiserror::Error;

/// Result type for cross-entropy operations.
pub type Result<T> = std::result::Result<T, XentError>;

/// Errors raised before any kernel touches a buffer.
///
/// Every check runs up front, so an operation that returns an error has left the
/// score buffer exactly as it found it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum XentError {
    /// A per-row input does not have one entry per score row.
    #[error("shape mismatch for {param}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Name of the offending input.
        param: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// A label is neither a valid column nor the ignore index.
    #[error("label {label} at row {row} is outside [0, {vocab_size}) and is not the ignore index")]
    LabelOutOfRange {
        /// Row holding the label.
        row: usize,
        /// The label value.
        label: i64,
        /// Number of columns in the score matrix.
        vocab_size: usize,
    },

    /// Mean normalisation over a batch where every row is ignored.
    #[error("cannot normalise loss: no row carries a valid label")]
    NoValidTokens,

    /// The score matrix has zero columns.
    #[error("score matrix has an empty vocabulary")]
    EmptyVocabulary,

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A view whose strides cannot be flattened without copying.
    #[error("incompatible layout: {0}")]
    Layout(&'static str),

    /// The dedicated worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    /// A configuration constant does not fit the accumulation type.
    #[error("value {0} is not representable in the accumulation type")]
    Conversion(f64),
}

impl From<rayon::ThreadPoolBuildError> for XentError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        XentError::ThreadPool(err.to_string())
    }
}
