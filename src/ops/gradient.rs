// gradient.rs
// Gradient writer: overwrites a column chunk of logits with
// dloss * (softmax - onehot(target)) * dz/dx.

use crate::backend::Logit;
use crate::ops::transform::LogitTransform;
use ndarray::{ArrayView1, ArrayViewMut1};
use num_traits::{Float, One, Zero};

/// Rewrites `chunk` (columns starting at `offset` of its row) with its gradient.
///
/// `logsumexp` must be the value forward produced for this row. Ignored rows
/// (`target == None`) are zeroed. The original logits are gone afterwards.
pub fn write_gradient_chunk<T: Logit>(
    mut chunk: ArrayViewMut1<'_, T>,
    offset: usize,
    logsumexp: T::Acc,
    target: Option<usize>,
    dloss: T::Acc,
    transform: &LogitTransform<T::Acc>,
) {
    let Some(label) = target else {
        chunk.fill(T::from_acc(T::Acc::zero()));
        return;
    };

    let one = T::Acc::one();
    for (j, x) in chunk.iter_mut().enumerate() {
        let raw = x.to_acc();
        let mut g = (transform.apply(raw) - logsumexp).exp();
        if offset + j == label {
            g = g - one;
        }
        *x = T::from_acc(dloss * g * transform.derivative(raw));
    }
}

/// Sum of a gradient row in accumulation precision. Zero up to rounding for any
/// labelled row written with the identity transform.
pub fn row_sum<T: Logit>(row: ArrayView1<'_, T>) -> T::Acc {
    row.iter().map(|&x| x.to_acc()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::reduction::logsumexp_logits;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, s};

    #[test]
    fn test_gradient_is_softmax_minus_onehot() {
        let t = LogitTransform::identity();
        let mut row = arr1(&[1.0f64, 2.0, 3.0, 4.0]);
        let lse = logsumexp_logits(row.view(), &t);
        let probs: Vec<f64> = row.iter().map(|x| (x - lse).exp()).collect();

        write_gradient_chunk(row.view_mut(), 0, lse, Some(1), 1.0, &t);

        for j in 0..4 {
            let expected = if j == 1 { probs[j] - 1.0 } else { probs[j] };
            assert_abs_diff_eq!(row[j], expected, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(row_sum(row.view()), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_chunks_use_global_offsets() {
        let t = LogitTransform::identity();
        let original = arr1(&[0.1f32, -0.4, 2.0, 1.0, 0.0, 3.0]);
        let lse = logsumexp_logits(original.view(), &t);

        let mut whole = original.clone();
        write_gradient_chunk(whole.view_mut(), 0, lse, Some(4), 0.5, &t);

        let mut chunked = original.clone();
        write_gradient_chunk(chunked.slice_mut(s![0..4]), 0, lse, Some(4), 0.5, &t);
        write_gradient_chunk(chunked.slice_mut(s![4..6]), 4, lse, Some(4), 0.5, &t);

        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_ignored_row_is_zeroed() {
        let t = LogitTransform::identity();
        let mut row = arr1(&[5.0f32, -3.0, 1e4]);
        write_gradient_chunk(row.view_mut(), 0, 1e4, None, 1.0, &t);
        assert!(row.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_upstream_scales_gradient() {
        let t = LogitTransform::identity();
        let base = arr1(&[0.3f64, 0.9, -1.2]);
        let lse = logsumexp_logits(base.view(), &t);

        let mut unit = base.clone();
        write_gradient_chunk(unit.view_mut(), 0, lse, Some(0), 1.0, &t);
        let mut scaled = base.clone();
        write_gradient_chunk(scaled.view_mut(), 0, lse, Some(0), -2.5, &t);

        for j in 0..3 {
            assert_abs_diff_eq!(scaled[j], -2.5 * unit[j], epsilon = 1e-12);
        }
    }
}
