// Loss functions for token classification over large vocabularies.
// Built on the per-row kernels in `ops`; this layer owns validation, dispatch
// between the single-pass and chunked paths, and scheduling across rows.

pub mod losses;

pub use losses::{
    CrossEntropyOutput, FusedCrossEntropy, Loss, ReductionType, UnfusedCrossEntropy,
    UpstreamGrad,
};
