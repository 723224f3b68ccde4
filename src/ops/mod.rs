// ops/mod.rs
// Per-row and per-chunk kernels. Everything here works on a single row (or one
// column chunk of it); scheduling across rows lives in `nn::losses`.

pub mod gradient;
pub mod labels;
pub mod reduction;
pub mod transform;

pub use gradient::{row_sum, write_gradient_chunk};
pub use labels::{resolve_targets, Targets};
pub use reduction::{
    chunk_bounds, combine_partials, logsumexp, logsumexp_logits, num_chunks, reduce_chunk,
    reduce_row, RowStats,
};
pub use transform::LogitTransform;
