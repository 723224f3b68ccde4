// transform.rs
// Elementwise logit transform applied before the softmax: optional scaling, then
// optional softcapping. Forward needs z(x); backward needs z(x) and dz/dx.

use crate::backend::Accum;
use crate::backend::number::cast;
use crate::config::CrossEntropyConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogitTransform<A> {
    scale: Option<A>,
    softcap: Option<A>,
}

impl<A: Accum> Default for LogitTransform<A> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<A: Accum> LogitTransform<A> {
    pub fn identity() -> Self {
        Self {
            scale: None,
            softcap: None,
        }
    }

    pub fn from_config(config: &CrossEntropyConfig) -> Result<Self> {
        Ok(Self {
            scale: config.logit_scale.map(cast::<A>).transpose()?,
            softcap: config.softcap.map(cast::<A>).transpose()?,
        })
    }

    /// z = softcap * tanh(scale * x / softcap)
    #[inline]
    pub fn apply(&self, x: A) -> A {
        let x = match self.scale {
            Some(s) => x * s,
            None => x,
        };
        match self.softcap {
            Some(c) => c * (x / c).tanh(),
            None => x,
        }
    }

    /// dz/dx evaluated at the raw logit `x`.
    #[inline]
    pub fn derivative(&self, x: A) -> A {
        let s = self.scale.unwrap_or_else(A::one);
        match self.softcap {
            Some(c) => {
                let t = (x * s / c).tanh();
                (A::one() - t * t) * s
            }
            None => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_identity_passes_through() {
        let t = LogitTransform::<f64>::identity();
        assert_eq!(t, LogitTransform::default());
        assert_eq!(t.apply(12.5), 12.5);
        assert_eq!(t.derivative(12.5), 1.0);
    }

    #[test]
    fn test_softcap_bounds_logits() {
        let config = CrossEntropyConfig::new().with_softcap(30.0);
        let t = LogitTransform::<f64>::from_config(&config).unwrap();
        assert!(t.apply(1e6) <= 30.0);
        assert!(t.apply(-1e6) >= -30.0);
        assert_abs_diff_eq!(t.apply(0.0), 0.0);
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let config = CrossEntropyConfig::new()
            .with_logit_scale(0.5)
            .with_softcap(4.0);
        let t = LogitTransform::<f64>::from_config(&config).unwrap();
        let h = 1e-6;
        for &x in &[-9.0, -1.5, 0.0, 0.7, 6.0] {
            let numeric = (t.apply(x + h) - t.apply(x - h)) / (2.0 * h);
            assert_abs_diff_eq!(t.derivative(x), numeric, epsilon = 1e-7);
        }
    }
}
