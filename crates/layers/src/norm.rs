//! Root-mean-square normalisation over the hidden axis.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Statistics are
//! promoted to [`PrecisionPolicy::reduction`] width, the normalised tensor is
//! cast back to the storage dtype and only then multiplied by the gain, so
//! the gain always applies at the dtype the next layer will consume.

use candle_core::{DType, Result, Tensor, D};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration for RMS normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser added to the mean square before the square root.
    pub epsilon: f64,
}

impl NormConfig {
    /// Creates a configuration with the conventional `1e-5` stabiliser.
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
        }
    }

    /// Same configuration with an explicit stabiliser.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }
}

/// RMS normalisation with a learned per-feature gain.
#[derive(Debug, Clone)]
pub struct RmsNorm {
    config: NormConfig,
    weight: Tensor,
}

impl RmsNorm {
    /// Constructs the layer from an existing gain vector.
    pub fn new(config: NormConfig, weight: Tensor) -> Result<Self> {
        checks::expect_shape("norm.weight", &weight, &[config.hidden_size])?;
        checks::expect_dtype_in(
            "norm.weight",
            &weight,
            &[DType::F16, DType::BF16, DType::F32],
        )?;
        checks::expect_contiguous("norm.weight", &weight)?;
        Ok(Self { config, weight })
    }

    /// Constructs the layer with every gain entry set to one.
    pub fn unit_gain(
        config: NormConfig,
        dtype: DType,
        device: &candle_core::Device,
    ) -> Result<Self> {
        let weight = Tensor::ones(config.hidden_size, dtype, device)?;
        Self::new(config, weight)
    }

    /// Returns the configuration so callers can check shape compatibility.
    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    /// Normalises `hidden` by its root mean square along the last axis and
    /// applies the gain.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let compute = policy.cast_for_reduction(hidden)?;
        let mean_square = (compute.sqr()?.sum_keepdim(D::Minus1)? / self.config.hidden_size as f64)?;
        let denom = (mean_square + self.config.epsilon)?.sqrt()?;
        let normalized = compute.broadcast_div(&denom)?;

        let normalized = policy.cast_to_storage(&normalized)?;
        let weight = if self.weight.dtype() == normalized.dtype() {
            self.weight.clone()
        } else {
            self.weight.to_dtype(normalized.dtype())?
        };
        normalized.broadcast_mul(&weight)
    }
}
