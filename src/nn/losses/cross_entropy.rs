// src/nn/losses/cross_entropy.rs
// Fused cross-entropy over wide vocabularies.
// Forward reads every logit once and keeps only a per-row log-sum-exp; backward
// overwrites the logits with their gradient instead of allocating a second
// [rows, vocab] buffer.

use crate::backend::{Executor, Logit};
use crate::config::CrossEntropyConfig;
use crate::error::{Result, XentError};
use crate::nn::losses::{
    check_rows, CrossEntropyOutput, Loss, ReductionType, UpstreamGrad,
};
use crate::ops::{
    combine_partials, num_chunks, reduce_chunk, reduce_row, resolve_targets,
    write_gradient_chunk, LogitTransform,
};
use ndarray::{
    Array1, Array2, ArrayBase, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut2,
    ArrayViewMut3, Axis, RawData, RemoveAxis, Zip,
};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use tracing::{debug, trace};

/// Fused cross-entropy loss.
///
/// Rows up to `max_fused_size` columns are reduced in one pass; wider rows are
/// split into column chunks whose partial log-sum-exps are combined per row.
/// Work is spread over rows (and chunks) on the configured device.
///
/// ```
/// use fused_xent::{CrossEntropyConfig, FusedCrossEntropy, IGNORE_INDEX};
/// use ndarray::array;
///
/// let loss_fn = FusedCrossEntropy::new(CrossEntropyConfig::default()).unwrap();
/// let logits = array![[[1.0f32, 2.0, 3.0, 4.0], [0.0, 0.0, 0.0, 0.0]]];
/// let labels = array![[3i64, IGNORE_INDEX]];
///
/// let loss = loss_fn.loss(logits.view(), labels.view()).unwrap();
/// assert!((loss - 0.4401897).abs() < 1e-5);
/// ```
#[derive(Debug, Clone)]
pub struct FusedCrossEntropy {
    config: CrossEntropyConfig,
    executor: Executor,
}

impl FusedCrossEntropy {
    pub fn new(config: CrossEntropyConfig) -> Result<Self> {
        config.validate()?;
        let executor = Executor::new(config.device)?;
        Ok(Self { config, executor })
    }

    pub fn config(&self) -> &CrossEntropyConfig {
        &self.config
    }

    fn check_inputs(&self, n_rows: usize, vocab_size: usize, n_labels: usize) -> Result<()> {
        if vocab_size == 0 {
            return Err(XentError::EmptyVocabulary);
        }
        check_rows("labels", n_rows, n_labels)
    }

    /// Whole-row reducer, one work unit per row.
    pub fn forward_single_pass<T: Logit>(
        &self,
        scores: ArrayView2<'_, T>,
        labels: ArrayView1<'_, i64>,
    ) -> Result<CrossEntropyOutput<T::Acc>> {
        let (n_rows, vocab_size) = scores.dim();
        self.check_inputs(n_rows, vocab_size, labels.len())?;
        let targets = resolve_targets(labels, vocab_size, self.config.ignore_index)?;
        let transform = LogitTransform::<T::Acc>::from_config(&self.config)?;

        debug!(rows = n_rows, vocab = vocab_size, "single-pass forward");

        let mut losses = Array1::<T::Acc>::zeros(n_rows);
        let mut logsumexp = Array1::<T::Acc>::zeros(n_rows);
        self.executor.install(|| {
            Zip::from(&mut losses)
                .and(&mut logsumexp)
                .and(scores.rows())
                .and(&targets.columns)
                .par_for_each(|loss, lse, row, &target| {
                    let stats = reduce_row(row, target, &transform);
                    *loss = stats.loss;
                    *lse = stats.logsumexp;
                });
        });

        Ok(CrossEntropyOutput {
            losses,
            logsumexp,
            n_valid: targets.n_valid,
        })
    }

    /// Two-stage reducer: one work unit per (row, chunk) writing into
    /// [chunks, rows] partial buffers, then a per-row combine.
    pub fn forward_chunked<T: Logit>(
        &self,
        scores: ArrayView2<'_, T>,
        labels: ArrayView1<'_, i64>,
        chunk_size: usize,
    ) -> Result<CrossEntropyOutput<T::Acc>> {
        if chunk_size == 0 {
            return Err(XentError::InvalidConfig(
                "chunk_size must be non-zero".to_string(),
            ));
        }
        let (n_rows, vocab_size) = scores.dim();
        self.check_inputs(n_rows, vocab_size, labels.len())?;
        let targets = resolve_targets(labels, vocab_size, self.config.ignore_index)?;
        let transform = LogitTransform::<T::Acc>::from_config(&self.config)?;
        let n_chunks = num_chunks(vocab_size, chunk_size);

        debug!(
            rows = n_rows,
            vocab = vocab_size,
            chunks = n_chunks,
            chunk_size,
            "chunked forward"
        );

        let mut lse_parts = Array2::<T::Acc>::zeros((n_chunks, n_rows));
        let mut loss_parts = Array2::<T::Acc>::zeros((n_chunks, n_rows));
        let mut losses = Array1::<T::Acc>::zeros(n_rows);
        let mut logsumexp = Array1::<T::Acc>::zeros(n_rows);

        self.executor.install(|| {
            Zip::indexed(lse_parts.rows_mut())
                .and(loss_parts.rows_mut())
                .par_for_each(|chunk, lse_col, loss_col| {
                    Zip::from(lse_col)
                        .and(loss_col)
                        .and(scores.rows())
                        .and(&targets.columns)
                        .par_for_each(|lse, loss, row, &target| {
                            let stats = reduce_chunk(row, chunk, chunk_size, target, &transform);
                            *lse = stats.logsumexp;
                            *loss = stats.loss;
                        });
                });

            // Every (row, chunk) unit has completed once the loop above returns.
            Zip::from(&mut losses)
                .and(&mut logsumexp)
                .and(lse_parts.columns())
                .and(loss_parts.columns())
                .and(&targets.columns)
                .par_for_each(|loss, lse, lse_part, loss_part, &target| {
                    let stats = combine_partials(lse_part, loss_part, target);
                    *loss = stats.loss;
                    *lse = stats.logsumexp;
                });
        });

        Ok(CrossEntropyOutput {
            losses,
            logsumexp,
            n_valid: targets.n_valid,
        })
    }

    /// Loss over [batch, seq, vocab] logits, reduced per the configured
    /// reduction. The mean divides by the number of non-ignored tokens.
    pub fn loss<T: Logit>(
        &self,
        logits: ArrayView3<'_, T>,
        labels: ArrayView2<'_, i64>,
    ) -> Result<T::Acc> {
        check_token_shape(logits.dim(), labels.dim())?;
        let scores = merge_token_axes(logits)?;
        let labels = merge_token_axes(labels)?;
        self.forward(scores, labels)?.reduce(self.config.reduction)
    }

    /// Forward and backward in one call: returns the reduced loss and leaves
    /// d(loss)/d(logits) in `logits`.
    pub fn loss_and_grad_in_place<T: Logit>(
        &self,
        logits: ArrayViewMut3<'_, T>,
        labels: ArrayView2<'_, i64>,
    ) -> Result<T::Acc> {
        check_token_shape(logits.dim(), labels.dim())?;
        let scores = merge_token_axes(logits)?;
        let labels = merge_token_axes(labels)?;

        let output = self.forward(scores.view(), labels)?;
        let loss = output.reduce(self.config.reduction)?;
        let scale = output.upstream_scale(self.config.reduction)?;
        self.backward_in_place(
            scores,
            output.logsumexp.view(),
            labels,
            UpstreamGrad::Scalar(scale),
        )?;
        Ok(loss)
    }
}

impl Loss for FusedCrossEntropy {
    fn forward<T: Logit>(
        &self,
        scores: ArrayView2<'_, T>,
        labels: ArrayView1<'_, i64>,
    ) -> Result<CrossEntropyOutput<T::Acc>> {
        if scores.ncols() <= self.config.max_fused_size {
            self.forward_single_pass(scores, labels)
        } else {
            self.forward_chunked(scores, labels, self.config.effective_forward_chunk())
        }
    }

    fn backward_in_place<'s, T: Logit>(
        &self,
        mut scores: ArrayViewMut2<'s, T>,
        logsumexp: ArrayView1<'_, T::Acc>,
        labels: ArrayView1<'_, i64>,
        upstream: UpstreamGrad<'_, T::Acc>,
    ) -> Result<ArrayViewMut2<'s, T>> {
        let (n_rows, vocab_size) = scores.dim();
        self.check_inputs(n_rows, vocab_size, labels.len())?;
        check_rows("logsumexp", n_rows, logsumexp.len())?;
        let dloss = upstream.per_row(n_rows)?;
        let targets = resolve_targets(labels, vocab_size, self.config.ignore_index)?;
        let transform = LogitTransform::<T::Acc>::from_config(&self.config)?;
        let chunk_size = self.config.backward_chunk_size;
        let n_chunks = num_chunks(vocab_size, chunk_size);

        trace!(rows = n_rows, vocab = vocab_size, chunks = n_chunks, "backward in place");

        self.executor.install(|| {
            Zip::from(scores.rows_mut())
                .and(&logsumexp)
                .and(&targets.columns)
                .and(&dloss)
                .par_for_each(|mut row, &lse, &target, &dloss| {
                    if n_chunks <= 1 {
                        write_gradient_chunk(row, 0, lse, target, dloss, &transform);
                        return;
                    }
                    // Each chunk is a disjoint mutable sub-view of this row.
                    row.axis_chunks_iter_mut(Axis(0), chunk_size)
                        .into_par_iter()
                        .enumerate()
                        .for_each(|(chunk, values)| {
                            write_gradient_chunk(
                                values,
                                chunk * chunk_size,
                                lse,
                                target,
                                dloss,
                                &transform,
                            );
                        });
                });
        });

        Ok(scores)
    }

    fn ignore_index(&self) -> i64 {
        self.config.ignore_index
    }

    fn reduction(&self) -> ReductionType {
        self.config.reduction
    }
}

/// Labels must be [batch, seq] for [batch, seq, vocab] logits.
pub(crate) fn check_token_shape(
    logits: (usize, usize, usize),
    labels: (usize, usize),
) -> Result<()> {
    let (batch, seq, _) = logits;
    check_rows("labels batch", batch, labels.0)?;
    check_rows("labels sequence", seq, labels.1)
}

/// Folds the leading (batch) axis into the next one without copying.
pub(crate) fn merge_token_axes<S, D>(mut array: ArrayBase<S, D>) -> Result<ArrayBase<S, D::Smaller>>
where
    S: RawData,
    D: RemoveAxis,
{
    if !array.merge_axes(Axis(0), Axis(1)) {
        return Err(XentError::Layout(
            "batch and sequence axes cannot be flattened into rows without a copy",
        ));
    }
    Ok(array.index_axis_move(Axis(0), 0))
}
