//! # fused-xent
//!
//! Fused cross-entropy loss and gradient for language-model sized vocabularies.
//!
//! ## Features
//!
//! - Numerically stable log-sum-exp (max subtraction, no overflow at large logits)
//! - Single-pass reduction for rows up to a configurable block size
//! - Two-stage chunked reduction for wider rows (partial log-sum-exp per chunk, then a
//!   log-sum-exp combine per row)
//! - In-place backward: the logits buffer is overwritten with softmax minus one-hot
//! - Ignore-index rows contribute neither loss nor gradient
//! - Data-parallel over rows and column chunks with rayon
//! - Works on strided `ndarray` views; f32/f64 storage, f16/bf16 with the `half` feature
//! - Optional logit scaling and softcapping
//!
pub mod backend;
pub mod config;
pub mod error;
pub mod nn;
pub mod ops;

// Re-export commonly used types for convenience
pub use backend::{Accum, Device, Logit, default_device, serial};
pub use config::{BACKWARD_CHUNK_SIZE, CrossEntropyConfig, IGNORE_INDEX, MAX_FUSED_SIZE};
pub use error::{Result, XentError};
pub use nn::{
    CrossEntropyOutput, FusedCrossEntropy, Loss, ReductionType, UnfusedCrossEntropy,
    UpstreamGrad,
};
