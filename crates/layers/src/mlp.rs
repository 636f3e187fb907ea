//! Gated position-wise feed-forward network.
//!
//! The MLP operates on hidden states shaped `(batch, seq, hidden)` and
//! returns the same layout. Two parallel projections expand the hidden
//! dimension to `intermediate_size`; the activated gate branch multiplies
//! the linear branch elementwise before the contraction back to the model
//! width. All three projections are bias-free.

use std::sync::Arc;

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::{
    activations::{builtin, Activation, ActivationKind},
    checks,
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
};

/// Configuration for the gated feed-forward network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Activation applied to the gate branch.
    pub activation: ActivationKind,
}

impl FeedForwardConfig {
    /// Creates a configuration with an explicit intermediate width.
    pub fn new(hidden_size: usize, intermediate_size: usize, activation: ActivationKind) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation,
        }
    }

    /// Derives the intermediate width from the hidden size: start at four
    /// times the hidden size, take two thirds of that, apply the optional
    /// multiplier, then round up to the nearest multiple of `multiple_of`.
    pub fn gated_with_rounding(
        hidden_size: usize,
        multiple_of: usize,
        multiplier: Option<f32>,
        activation: ActivationKind,
    ) -> Result<Self> {
        if hidden_size == 0 {
            return Err(Error::Msg("feed-forward hidden_size must be non-zero".into()));
        }
        if multiple_of == 0 {
            return Err(Error::Msg(
                "feed-forward width rounding requires multiple_of > 0".into(),
            ));
        }
        if let Some(factor) = multiplier {
            if factor <= 0.0 {
                return Err(Error::Msg(format!(
                    "feed-forward width multiplier must be positive, got {}",
                    factor
                )));
            }
        }
        let mut width = 4 * hidden_size;
        width = 2 * width / 3;
        if let Some(factor) = multiplier {
            width = (factor * width as f32) as usize;
        }
        let intermediate_size = multiple_of * ((width + multiple_of - 1) / multiple_of);
        Ok(Self::new(hidden_size, intermediate_size, activation))
    }
}

/// Gated two-branch MLP with a contraction back to the hidden size.
pub struct FeedForward {
    config: FeedForwardConfig,
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
    activation: Arc<dyn Activation>,
}

impl FeedForward {
    /// Assembles the network from pre-built projections.
    pub fn new(
        config: FeedForwardConfig,
        gate_proj: Linear,
        up_proj: Linear,
        down_proj: Linear,
    ) -> Result<Self> {
        let expand = LinearConfig::new(config.hidden_size, config.intermediate_size);
        let contract = LinearConfig::new(config.intermediate_size, config.hidden_size);
        for (name, proj, expected) in [
            ("mlp.gate_proj", &gate_proj, &expand),
            ("mlp.up_proj", &up_proj, &expand),
            ("mlp.down_proj", &down_proj, &contract),
        ] {
            if proj.config() != expected {
                return Err(Error::Msg(format!(
                    "{}: expected {}x{} projection, got {}x{}",
                    name,
                    expected.output_dim,
                    expected.input_dim,
                    proj.config().output_dim,
                    proj.config().input_dim
                )));
            }
        }
        let activation = builtin(config.activation);
        Ok(Self {
            config,
            gate_proj,
            up_proj,
            down_proj,
            activation,
        })
    }

    /// Builds the network with freshly sampled projection weights.
    pub fn with_init(
        config: FeedForwardConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let expand = LinearConfig::new(config.hidden_size, config.intermediate_size);
        let contract = LinearConfig::new(config.intermediate_size, config.hidden_size);
        let gate_proj = Linear::with_init(expand.clone(), init, device, dtype)?;
        let up_proj = Linear::with_init(expand, init, device, dtype)?;
        let down_proj = Linear::with_init(contract, init, device, dtype)?;
        Self::new(config, gate_proj, up_proj, down_proj)
    }

    /// Configuration metadata used during block assembly.
    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    /// Applies `down(act(gate(x)) * up(x))`.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("mlp.input", hidden, self.config.hidden_size)?;
        let gate = self.gate_proj.forward(hidden, policy)?;
        let gate = self.activation.forward(&gate, policy)?;
        let up = self.up_proj.forward(hidden, policy)?;
        let gated = gate.mul(&up)?;
        self.down_proj.forward(&gated, policy)
    }
}
