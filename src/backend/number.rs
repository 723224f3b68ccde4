// src/backend/number.rs

use crate::error::{Result, XentError};
use num_traits::{Float, FromPrimitive, NumAssign, NumCast};
use std::fmt::{Debug, Display};
use std::iter::Sum;

/// Floating-point type every reduction accumulates in.
/// Kept separate from the storage type so half-precision logits are
/// still reduced in f32.
pub trait Accum:
    Float + FromPrimitive + NumAssign + Sum + Send + Sync + Debug + Display + 'static
{
}

impl Accum for f32 {}

impl Accum for f64 {}

/// Element type of a score buffer.
///
/// Forward widens every element to `Acc` before reducing; backward narrows the
/// gradient back to storage precision when it overwrites the buffer.
pub trait Logit: Copy + Send + Sync + Debug + 'static {
    /// Accumulation precision for this storage type.
    type Acc: Accum;

    /// Widen to the accumulation type.
    fn to_acc(self) -> Self::Acc;

    /// Narrow from the accumulation type (rounds to nearest).
    fn from_acc(value: Self::Acc) -> Self;
}

impl Logit for f32 {
    type Acc = f32;

    #[inline]
    fn to_acc(self) -> f32 {
        self
    }

    #[inline]
    fn from_acc(value: f32) -> Self {
        value
    }
}

impl Logit for f64 {
    type Acc = f64;

    #[inline]
    fn to_acc(self) -> f64 {
        self
    }

    #[inline]
    fn from_acc(value: f64) -> Self {
        value
    }
}

#[cfg(feature = "half")]
impl Logit for half::f16 {
    type Acc = f32;

    #[inline]
    fn to_acc(self) -> f32 {
        self.to_f32()
    }

    #[inline]
    fn from_acc(value: f32) -> Self {
        half::f16::from_f32(value)
    }
}

#[cfg(feature = "half")]
impl Logit for half::bf16 {
    type Acc = f32;

    #[inline]
    fn to_acc(self) -> f32 {
        self.to_f32()
    }

    #[inline]
    fn from_acc(value: f32) -> Self {
        half::bf16::from_f32(value)
    }
}

/// Converts a configuration constant into the accumulation type.
pub fn cast<A: Accum>(value: f64) -> Result<A> {
    <A as NumCast>::from(value)
        .filter(|v| v.is_finite() || !value.is_finite())
        .ok_or(XentError::Conversion(value))
}
