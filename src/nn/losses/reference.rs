// src/nn/losses/reference.rs
// Unfused cross-entropy: materialises the transformed logits, the softmax and the
// gradient as full [rows, vocab] matrices. Slow and memory hungry; kept as the
// ground truth the fused kernels are checked against.

use crate::backend::{Accum, Logit};
use crate::config::CrossEntropyConfig;
use crate::error::{Result, XentError};
use crate::nn::losses::{check_rows, CrossEntropyOutput, Loss, ReductionType, UpstreamGrad};
use crate::ops::{resolve_targets, LogitTransform};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis, Zip};
use num_traits::{Float, One, Zero};

#[derive(Debug, Clone)]
pub struct UnfusedCrossEntropy {
    config: CrossEntropyConfig,
}

impl UnfusedCrossEntropy {
    pub fn new(config: CrossEntropyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn transformed<T: Logit>(&self, scores: &ArrayView2<'_, T>) -> Result<Array2<T::Acc>> {
        let transform = LogitTransform::<T::Acc>::from_config(&self.config)?;
        Ok(scores.mapv(|x| transform.apply(x.to_acc())))
    }
}

/// Row-wise log-sum-exp of a full matrix: max(z) + ln(sum(exp(z - max(z)))).
fn logsumexp_rows<A: Accum>(z: &Array2<A>) -> Array1<A> {
    let max = z.fold_axis(Axis(1), A::neg_infinity(), |&acc, &x| if x > acc { x } else { acc });
    let shifted = z - &max.view().insert_axis(Axis(1));
    let sum_exp = shifted.mapv(|v| v.exp()).sum_axis(Axis(1));
    &max + &sum_exp.mapv(|v| v.ln())
}

impl Loss for UnfusedCrossEntropy {
    fn forward<T: Logit>(
        &self,
        scores: ArrayView2<'_, T>,
        labels: ArrayView1<'_, i64>,
    ) -> Result<CrossEntropyOutput<T::Acc>> {
        let (n_rows, vocab_size) = scores.dim();
        if vocab_size == 0 {
            return Err(XentError::EmptyVocabulary);
        }
        check_rows("labels", n_rows, labels.len())?;
        let targets = resolve_targets(labels, vocab_size, self.config.ignore_index)?;

        let z = self.transformed(&scores)?;
        let logsumexp = logsumexp_rows(&z);
        let log_probs = &z - &logsumexp.view().insert_axis(Axis(1));

        let losses = Array1::from_iter(targets.columns.iter().enumerate().map(
            |(row, target)| match target {
                Some(col) => -log_probs[[row, *col]],
                None => T::Acc::zero(),
            },
        ));

        Ok(CrossEntropyOutput {
            losses,
            logsumexp,
            n_valid: targets.n_valid,
        })
    }

    fn backward_in_place<'s, T: Logit>(
        &self,
        mut scores: ArrayViewMut2<'s, T>,
        logsumexp: ArrayView1<'_, T::Acc>,
        labels: ArrayView1<'_, i64>,
        upstream: UpstreamGrad<'_, T::Acc>,
    ) -> Result<ArrayViewMut2<'s, T>> {
        let (n_rows, vocab_size) = scores.dim();
        if vocab_size == 0 {
            return Err(XentError::EmptyVocabulary);
        }
        check_rows("labels", n_rows, labels.len())?;
        check_rows("logsumexp", n_rows, logsumexp.len())?;
        let dloss = upstream.per_row(n_rows)?;
        let targets = resolve_targets(labels, vocab_size, self.config.ignore_index)?;
        let transform = LogitTransform::<T::Acc>::from_config(&self.config)?;

        let z = self.transformed(&scores.view())?;
        let mut grad = (&z - &logsumexp.insert_axis(Axis(1))).mapv(|v| v.exp());
        for (row, target) in targets.columns.iter().enumerate() {
            match target {
                Some(col) => grad[[row, *col]] = grad[[row, *col]] - T::Acc::one(),
                None => grad.row_mut(row).fill(T::Acc::zero()),
            }
        }
        grad *= &dloss.view().insert_axis(Axis(1));

        Zip::from(&mut scores).and(&grad).for_each(|x, &g| {
            *x = T::from_acc(g * transform.derivative(x.to_acc()));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IGNORE_INDEX;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_reference_known_values() {
        let ce = UnfusedCrossEntropy::new(CrossEntropyConfig::default()).unwrap();
        let scores = array![[1.0f64, 2.0, 3.0, 4.0], [0.0, 0.0, 0.0, 0.0]];
        let labels = array![3i64, IGNORE_INDEX];
        let out = ce.forward(scores.view(), labels.view()).unwrap();

        let lse = (1f64.exp() + 2f64.exp() + 3f64.exp() + 4f64.exp()).ln();
        assert_abs_diff_eq!(out.losses[0], lse - 4.0, epsilon = 1e-12);
        assert_eq!(out.losses[1], 0.0);
        assert_abs_diff_eq!(out.logsumexp[1], 4f64.ln(), epsilon = 1e-12);
        assert_eq!(out.n_valid, 1);
    }

    #[test]
    fn test_reference_gradient_uniform_row() {
        let ce = UnfusedCrossEntropy::new(CrossEntropyConfig::default()).unwrap();
        let mut scores = array![[0.0f64, 0.0, 0.0, 0.0]];
        let labels = array![2i64];
        let out = ce.forward(scores.view(), labels.view()).unwrap();
        let grad = ce
            .backward_in_place(
                scores.view_mut(),
                out.logsumexp.view(),
                labels.view(),
                UpstreamGrad::Scalar(1.0),
            )
            .unwrap();
        let expected = array![[0.25, 0.25, -0.75, 0.25]];
        for (g, e) in grad.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*g, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_reference_scales_each_row_by_upstream() {
        let ce = UnfusedCrossEntropy::new(CrossEntropyConfig::default()).unwrap();
        let mut scores = array![[0.0f32, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]];
        let labels = array![2i64, 0];
        let upstream = array![2.0f32, -0.5];
        let out = ce.forward(scores.view(), labels.view()).unwrap();
        let grad = ce
            .backward_in_place(
                scores.view_mut(),
                out.logsumexp.view(),
                labels.view(),
                UpstreamGrad::PerRow(upstream.view()),
            )
            .unwrap();
        let expected = array![[0.5f32, 0.5, -1.5, 0.5], [0.375, -0.125, -0.125, -0.125]];
        for (g, e) in grad.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*g, *e, epsilon = 1e-6);
        }
    }
}
