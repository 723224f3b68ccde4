//! Tunables for the fused cross-entropy kernels.

use crate::backend::Device;
use crate::error::{Result, XentError};
use crate::nn::losses::ReductionType;
use serde::{Deserialize, Serialize};

/// Label value marking a row that contributes neither loss nor gradient.
pub const IGNORE_INDEX: i64 = -100;

/// Widest row reduced in a single pass (2^16 elements).
pub const MAX_FUSED_SIZE: usize = 65536;

/// Column chunk handled by one backward work unit.
pub const BACKWARD_CHUNK_SIZE: usize = 4096;

/// Configuration for [`FusedCrossEntropy`](crate::FusedCrossEntropy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossEntropyConfig {
    /// Rows up to this many columns use the single-pass reducer. Must be a power of two.
    pub max_fused_size: usize,

    /// Column chunk for the chunked forward path. Defaults to `max_fused_size`.
    pub forward_chunk_size: Option<usize>,

    /// Column chunk for backward work units.
    pub backward_chunk_size: usize,

    /// Sentinel label for ignored rows (typically -100).
    pub ignore_index: i64,

    /// Multiply logits by this factor before the softmax (Cohere-style scaling).
    pub logit_scale: Option<f64>,

    /// Softcap logits to `softcap * tanh(x / softcap)` before the softmax (Gemma2-style).
    pub softcap: Option<f64>,

    /// How [`FusedCrossEntropy::loss`](crate::FusedCrossEntropy::loss) reduces per-row losses.
    pub reduction: ReductionType,

    /// Worker pool for row and chunk units.
    pub device: Device,
}

impl Default for CrossEntropyConfig {
    fn default() -> Self {
        Self {
            max_fused_size: MAX_FUSED_SIZE,
            forward_chunk_size: None,
            backward_chunk_size: BACKWARD_CHUNK_SIZE,
            ignore_index: IGNORE_INDEX,
            logit_scale: None,
            softcap: None,
            reduction: ReductionType::Mean,
            device: Device::Global,
        }
    }
}

impl CrossEntropyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_fused_size(mut self, size: usize) -> Self {
        self.max_fused_size = size;
        self
    }

    pub fn with_forward_chunk_size(mut self, size: usize) -> Self {
        self.forward_chunk_size = Some(size);
        self
    }

    pub fn with_backward_chunk_size(mut self, size: usize) -> Self {
        self.backward_chunk_size = size;
        self
    }

    pub fn with_ignore_index(mut self, index: i64) -> Self {
        self.ignore_index = index;
        self
    }

    pub fn with_logit_scale(mut self, scale: f64) -> Self {
        self.logit_scale = Some(scale);
        self
    }

    pub fn with_softcap(mut self, softcap: f64) -> Self {
        self.softcap = Some(softcap);
        self
    }

    pub fn with_reduction(mut self, reduction: ReductionType) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Column chunk used by the chunked forward path.
    pub fn effective_forward_chunk(&self) -> usize {
        self.forward_chunk_size.unwrap_or(self.max_fused_size)
    }

    /// Checks every field; called by the loss constructors.
    pub fn validate(&self) -> Result<()> {
        if !self.max_fused_size.is_power_of_two() {
            return Err(XentError::InvalidConfig(format!(
                "max_fused_size must be a power of two, got {}",
                self.max_fused_size
            )));
        }
        let forward_chunk = self.effective_forward_chunk();
        if forward_chunk == 0 || forward_chunk > self.max_fused_size {
            return Err(XentError::InvalidConfig(format!(
                "forward_chunk_size must be in 1..={}, got {}",
                self.max_fused_size, forward_chunk
            )));
        }
        if self.backward_chunk_size == 0 {
            return Err(XentError::InvalidConfig(
                "backward_chunk_size must be non-zero".to_string(),
            ));
        }
        // A non-negative sentinel would shadow a real column.
        if self.ignore_index >= 0 {
            return Err(XentError::InvalidConfig(format!(
                "ignore_index must be negative, got {}",
                self.ignore_index
            )));
        }
        if let Some(scale) = self.logit_scale {
            if !scale.is_finite() || scale == 0.0 {
                return Err(XentError::InvalidConfig(format!(
                    "logit_scale must be finite and non-zero, got {}",
                    scale
                )));
            }
        }
        if let Some(cap) = self.softcap {
            if !cap.is_finite() || cap <= 0.0 {
                return Err(XentError::InvalidConfig(format!(
                    "softcap must be finite and positive, got {}",
                    cap
                )));
            }
        }
        if self.device == Device::Threads(0) {
            return Err(XentError::InvalidConfig(
                "device needs at least one worker thread".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CrossEntropyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_forward_chunk(), MAX_FUSED_SIZE);
        assert_eq!(config.ignore_index, IGNORE_INDEX);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = vec![
            CrossEntropyConfig::new().with_max_fused_size(48),
            CrossEntropyConfig::new().with_max_fused_size(0),
            CrossEntropyConfig::new().with_forward_chunk_size(0),
            CrossEntropyConfig::new()
                .with_max_fused_size(8)
                .with_forward_chunk_size(16),
            CrossEntropyConfig::new().with_backward_chunk_size(0),
            CrossEntropyConfig::new().with_ignore_index(0),
            CrossEntropyConfig::new().with_logit_scale(0.0),
            CrossEntropyConfig::new().with_softcap(-1.0),
            CrossEntropyConfig::new().with_softcap(f64::INFINITY),
            CrossEntropyConfig::new().with_device(Device::Threads(0)),
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(XentError::InvalidConfig(_))),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: CrossEntropyConfig =
            serde_json::from_str(r#"{"max_fused_size": 1024, "softcap": 30.0}"#).unwrap();
        assert_eq!(config.max_fused_size, 1024);
        assert_eq!(config.softcap, Some(30.0));
        assert_eq!(config.backward_chunk_size, BACKWARD_CHUNK_SIZE);
        assert_eq!(config.reduction, ReductionType::Mean);
        assert!(config.validate().is_ok());
    }
}
