pub mod cross_entropy;
pub mod reference;

use crate::backend::number::cast;
use crate::backend::{Accum, Logit};
use crate::error::{Result, XentError};
use ndarray::{Array1, ArrayView1, ArrayView2, ArrayViewMut2, CowArray, Ix1};
use serde::{Deserialize, Serialize};

pub use cross_entropy::FusedCrossEntropy;
pub use reference::UnfusedCrossEntropy;

/// Base trait for token-level classification losses.
/// Forward leaves the scores intact; backward consumes them and hands the same
/// buffer back holding the gradient.
pub trait Loss {
    /// Per-row losses plus the per-row log-sum-exp backward needs.
    /// scores: [rows, vocab], labels: [rows]
    fn forward<T: Logit>(
        &self,
        scores: ArrayView2<'_, T>,
        labels: ArrayView1<'_, i64>,
    ) -> Result<CrossEntropyOutput<T::Acc>>;

    /// Overwrites `scores` with d(loss)/d(scores) and returns it.
    /// `logsumexp` must come from `forward` on the same scores.
    fn backward_in_place<'s, T: Logit>(
        &self,
        scores: ArrayViewMut2<'s, T>,
        logsumexp: ArrayView1<'_, T::Acc>,
        labels: ArrayView1<'_, i64>,
        upstream: UpstreamGrad<'_, T::Acc>,
    ) -> Result<ArrayViewMut2<'s, T>>;

    /// Label value excluded from loss and gradient.
    fn ignore_index(&self) -> i64;

    /// How per-row losses are reduced to a scalar.
    fn reduction(&self) -> ReductionType {
        ReductionType::Mean
    }
}

/// Loss reduction strategies - determines how per-token losses are aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReductionType {
    /// Average over rows whose label is not ignored
    #[default]
    Mean,
    /// Sum over all rows (ignored rows contribute zero)
    Sum,
}

/// Gradient of the caller's objective with respect to each row's loss.
#[derive(Debug, Clone, Copy)]
pub enum UpstreamGrad<'a, A> {
    /// The same factor for every row, e.g. `1 / n_valid` after a mean.
    Scalar(A),
    /// One factor per row.
    PerRow(ArrayView1<'a, A>),
}

impl<'a, A: Accum> UpstreamGrad<'a, A> {
    /// Expands to one value per row, checking the row count for `PerRow`.
    pub fn per_row(&self, n_rows: usize) -> Result<CowArray<'a, A, Ix1>> {
        match *self {
            UpstreamGrad::Scalar(value) => Ok(CowArray::from(Array1::from_elem(n_rows, value))),
            UpstreamGrad::PerRow(values) => {
                if values.len() != n_rows {
                    return Err(XentError::ShapeMismatch {
                        param: "upstream_grad",
                        expected: n_rows,
                        actual: values.len(),
                    });
                }
                Ok(CowArray::from(values))
            }
        }
    }
}

/// Output from a cross-entropy forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossEntropyOutput<A> {
    /// Per-row losses [rows]; zero for ignored rows.
    pub losses: Array1<A>,
    /// Per-row log-sum-exp [rows], kept for backward.
    pub logsumexp: Array1<A>,
    /// Rows whose label is not the ignore index.
    pub n_valid: usize,
}

impl<A: Accum> CrossEntropyOutput<A> {
    pub fn total_loss(&self) -> A {
        self.losses.iter().copied().sum()
    }

    /// Sum of losses over valid rows divided by their count.
    /// Fails with `NoValidTokens` when every row is ignored.
    pub fn mean_loss(&self) -> Result<A> {
        self.mean_loss_over(self.n_valid)
    }

    /// Mean with an explicit denominator, for normalising across several
    /// micro-batches that share one token count.
    pub fn mean_loss_over(&self, n_items: usize) -> Result<A> {
        if n_items == 0 {
            return Err(XentError::NoValidTokens);
        }
        Ok(self.total_loss() / cast::<A>(n_items as f64)?)
    }

    pub fn reduce(&self, reduction: ReductionType) -> Result<A> {
        match reduction {
            ReductionType::Mean => self.mean_loss(),
            ReductionType::Sum => Ok(self.total_loss()),
        }
    }

    /// Upstream factor that makes backward produce the gradient of `reduce(reduction)`.
    pub fn upstream_scale(&self, reduction: ReductionType) -> Result<A> {
        match reduction {
            ReductionType::Mean => {
                if self.n_valid == 0 {
                    return Err(XentError::NoValidTokens);
                }
                Ok(A::one() / cast::<A>(self.n_valid as f64)?)
            }
            ReductionType::Sum => Ok(A::one()),
        }
    }
}

/// Row-count check shared by both loss implementations.
pub(crate) fn check_rows(param: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(XentError::ShapeMismatch {
            param,
            expected,
            actual,
        });
    }
    Ok(())
}
