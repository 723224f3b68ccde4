// labels.rs
// Label validation. Runs before any kernel so a bad batch fails without side effects.

use crate::error::{Result, XentError};
use ndarray::{Array1, ArrayView1};

/// Resolved labels: the target column per row, `None` for ignored rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Targets {
    pub columns: Array1<Option<usize>>,
    pub n_valid: usize,
}

/// Maps each label to its column, rejecting anything outside `[0, vocab_size)`
/// that is not `ignore_index`.
pub fn resolve_targets(
    labels: ArrayView1<'_, i64>,
    vocab_size: usize,
    ignore_index: i64,
) -> Result<Targets> {
    let mut n_valid = 0;
    let mut columns = Vec::with_capacity(labels.len());

    for (row, &label) in labels.iter().enumerate() {
        if label == ignore_index {
            columns.push(None);
            continue;
        }
        match usize::try_from(label) {
            Ok(col) if col < vocab_size => {
                n_valid += 1;
                columns.push(Some(col));
            }
            _ => {
                return Err(XentError::LabelOutOfRange {
                    row,
                    label,
                    vocab_size,
                });
            }
        }
    }

    Ok(Targets {
        columns: Array1::from(columns),
        n_valid,
    })
}
