// reduction.rs
// Row reducer: stable log-sum-exp and the labelled loss term.
// The single-pass reducer handles a whole row; the chunked reducer emits one
// partial per column chunk and `combine_partials` folds them back into the row's
// true log-sum-exp and loss.

use crate::backend::{Accum, Logit};
use crate::ops::transform::LogitTransform;
use ndarray::{s, ArrayView1};
use num_traits::Zero;

/// Per-row (or per-chunk) reduction result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowStats<A> {
    pub logsumexp: A,
    pub loss: A,
}

/// log(sum(exp(v))) computed as c + log(sum(exp(v - c))) with c = max(v).
/// The iterator is walked twice, once for the max and once for the sum.
/// An empty input or one whose max is -inf yields -inf rather than NaN.
pub fn logsumexp<A, I>(values: I) -> A
where
    A: Accum,
    I: Iterator<Item = A> + Clone,
{
    let c = values
        .clone()
        .fold(A::neg_infinity(), |acc, v| if v > acc { v } else { acc });
    if c == A::neg_infinity() {
        return c;
    }
    let sum: A = values.map(|v| (v - c).exp()).sum();
    c + sum.ln()
}

/// Log-sum-exp of a run of stored logits after the logit transform.
pub fn logsumexp_logits<T: Logit>(
    logits: ArrayView1<'_, T>,
    transform: &LogitTransform<T::Acc>,
) -> T::Acc {
    logsumexp(logits.iter().map(|&x| transform.apply(x.to_acc())))
}

/// Single-pass reducer over a full row.
/// `loss = logsumexp - z[target]`, or zero when the row is ignored.
pub fn reduce_row<T: Logit>(
    row: ArrayView1<'_, T>,
    target: Option<usize>,
    transform: &LogitTransform<T::Acc>,
) -> RowStats<T::Acc> {
    let lse = logsumexp_logits(row, transform);
    let loss = match target {
        Some(col) => lse - transform.apply(row[col].to_acc()),
        None => T::Acc::zero(),
    };
    RowStats {
        logsumexp: lse,
        loss,
    }
}

/// Column range `[start, end)` of chunk `chunk` in a row of `vocab_size` columns.
#[inline]
pub fn chunk_bounds(chunk: usize, chunk_size: usize, vocab_size: usize) -> (usize, usize) {
    let start = chunk * chunk_size;
    (start.min(vocab_size), (start + chunk_size).min(vocab_size))
}

/// Number of column chunks covering `vocab_size` columns.
#[inline]
pub fn num_chunks(vocab_size: usize, chunk_size: usize) -> usize {
    vocab_size.div_ceil(chunk_size)
}

/// Partial reduction over one column chunk of a row.
///
/// The chunk holding the target reports only `-z[target]`; the row's log-sum-exp
/// is added once in [`combine_partials`].
pub fn reduce_chunk<T: Logit>(
    row: ArrayView1<'_, T>,
    chunk: usize,
    chunk_size: usize,
    target: Option<usize>,
    transform: &LogitTransform<T::Acc>,
) -> RowStats<T::Acc> {
    let (start, end) = chunk_bounds(chunk, chunk_size, row.len());
    let lse = logsumexp_logits(row.slice(s![start..end]), transform);
    let loss = match target {
        Some(col) if col >= start && col < end => -transform.apply(row[col].to_acc()),
        _ => T::Acc::zero(),
    };
    RowStats {
        logsumexp: lse,
        loss,
    }
}

/// Folds a row's chunk partials.
/// The log-sum-exp of partial log-sum-exps is the row's log-sum-exp; the loss
/// partials sum to `-z[target]`, and the combined log-sum-exp is added on top.
pub fn combine_partials<A: Accum>(
    partial_lse: ArrayView1<'_, A>,
    partial_loss: ArrayView1<'_, A>,
    target: Option<usize>,
) -> RowStats<A> {
    let lse = logsumexp(partial_lse.iter().copied());
    let loss = match target {
        Some(_) => partial_loss.iter().copied().sum::<A>() + lse,
        None => A::zero(),
    };
    RowStats {
        logsumexp: lse,
        loss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, Array1};

    fn naive_lse(v: &[f64]) -> f64 {
        v.iter().map(|x| x.exp()).sum::<f64>().ln()
    }

    #[test]
    fn test_logsumexp_matches_naive() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(logsumexp(v.iter().copied()), naive_lse(&v), epsilon = 1e-12);
    }

    #[test]
    fn test_logsumexp_degenerate_inputs() {
        assert_eq!(logsumexp(std::iter::empty::<f32>()), f32::NEG_INFINITY);
        let all_masked = [f32::NEG_INFINITY; 3];
        assert_eq!(logsumexp(all_masked.iter().copied()), f32::NEG_INFINITY);
        // Masked entries contribute nothing
        let mixed = [f32::NEG_INFINITY, 0.0, 0.0];
        assert_abs_diff_eq!(logsumexp(mixed.iter().copied()), 2f32.ln(), epsilon = 1e-6);
    }

    #[test]
    fn test_logsumexp_no_overflow() {
        let v = [1e4f32, 1e4, -1e4];
        let lse = logsumexp(v.iter().copied());
        assert!(lse.is_finite());
        assert_abs_diff_eq!(lse, 1e4 + 2f32.ln(), epsilon = 1e-2);
    }

    #[test]
    fn test_reduce_row_label_and_ignore() {
        let t = LogitTransform::identity();
        let row = arr1(&[1.0f64, 2.0, 3.0, 4.0]);
        let stats = reduce_row(row.view(), Some(3), &t);
        let expected_lse = naive_lse(&[1.0, 2.0, 3.0, 4.0]);
        assert_abs_diff_eq!(stats.logsumexp, expected_lse, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.loss, expected_lse - 4.0, epsilon = 1e-12);

        let ignored = reduce_row(row.view(), None, &t);
        assert_eq!(ignored.loss, 0.0);
        assert_abs_diff_eq!(ignored.logsumexp, expected_lse, epsilon = 1e-12);
    }

    #[test]
    fn test_chunk_bounds_partition_columns() {
        let vocab = 10;
        let size = 4;
        assert_eq!(num_chunks(vocab, size), 3);
        let bounds: Vec<_> = (0..3).map(|c| chunk_bounds(c, size, vocab)).collect();
        assert_eq!(bounds, vec![(0, 4), (4, 8), (8, 10)]);
        assert_eq!(num_chunks(8, 4), 2);
        assert_eq!(num_chunks(9, 4), 3);
    }

    #[test]
    fn test_only_label_chunk_reports_loss() {
        let t = LogitTransform::identity();
        let row = arr1(&[0.5f64, -1.0, 2.0, 3.0, 0.0, 1.5, -2.0, 0.25]);
        let parts: Vec<_> = (0..2).map(|c| reduce_chunk(row.view(), c, 4, Some(5), &t)).collect();
        assert_eq!(parts[0].loss, 0.0);
        assert_eq!(parts[1].loss, -1.5);
    }

    #[test]
    fn test_combine_equals_single_pass() {
        let t = LogitTransform::identity();
        let row = arr1(&[0.5f64, -1.0, 2.0, 3.0, 0.0, 1.5, -2.0, 0.25, 7.0]);
        for &chunk in &[1usize, 2, 4, 8, 9] {
            let n = num_chunks(row.len(), chunk);
            let parts: Vec<_> = (0..n)
                .map(|c| reduce_chunk(row.view(), c, chunk, Some(2), &t))
                .collect();
            let lse: Array1<f64> = parts.iter().map(|p| p.logsumexp).collect();
            let loss: Array1<f64> = parts.iter().map(|p| p.loss).collect();
            let combined = combine_partials(lse.view(), loss.view(), Some(2));
            let single = reduce_row(row.view(), Some(2), &t);
            assert_abs_diff_eq!(combined.logsumexp, single.logsumexp, epsilon = 1e-12);
            assert_abs_diff_eq!(combined.loss, single.loss, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_combine_ignored_row_forces_zero() {
        let lse = arr1(&[1.0f32, 2.0]);
        let loss = arr1(&[-3.0f32, 0.0]);
        let stats = combine_partials(lse.view(), loss.view(), None);
        assert_eq!(stats.loss, 0.0);
    }
}
