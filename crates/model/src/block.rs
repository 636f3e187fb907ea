//! Pre-norm residual decoder block.

use candle_core::{Result, Tensor};

use attention::{AttentionConfig, GroupedQueryAttention, LayerKvCache};
use embedding::positional::rope::RotarySlice;
use layers::{
    activations::ActivationKind,
    dtypes::PrecisionPolicy,
    linear::LinearInit,
    mlp::{FeedForward, FeedForwardConfig},
    norm::{NormConfig, RmsNorm},
};

use crate::config::ModelConfig;

/// One decoder block: attention then feed-forward, each behind its own RMS
/// norm and wrapped in a residual connection.
pub struct DecoderBlock {
    attention_norm: RmsNorm,
    attention: GroupedQueryAttention,
    ffn_norm: RmsNorm,
    feed_forward: FeedForward,
}

impl DecoderBlock {
    /// Builds one block from a validated model configuration.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let norm_config = NormConfig::new(config.hidden_dim).with_epsilon(config.norm_eps);
        let attention_norm = RmsNorm::unit_gain(norm_config.clone(), config.dtype, &config.device)?;
        let ffn_norm = RmsNorm::unit_gain(norm_config, config.dtype, &config.device)?;

        let attention = GroupedQueryAttention::new(AttentionConfig {
            hidden_dim: config.hidden_dim,
            n_heads: config.n_heads,
            n_kv_heads: config.n_kv_heads(),
            head_dim: config.head_dim(),
            dtype: config.dtype,
            device: config.device.clone(),
        })?;

        let ff_config = FeedForwardConfig::gated_with_rounding(
            config.hidden_dim,
            config.multiple_of,
            config.ffn_dim_multiplier,
            ActivationKind::Silu,
        )?;
        let feed_forward = FeedForward::with_init(
            ff_config,
            &LinearInit::XavierUniform,
            &config.device,
            config.dtype,
        )?;

        Ok(Self {
            attention_norm,
            attention,
            ffn_norm,
            feed_forward,
        })
    }

    /// Advances the block one chunk of positions, threading the layer's
    /// key/value cache through the attention step.
    pub fn forward(
        &self,
        hidden: &Tensor,
        start_pos: usize,
        rotary: &RotarySlice,
        cache: &mut LayerKvCache,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        let normed = self.attention_norm.forward(hidden, policy)?;
        let attn_out = self
            .attention
            .forward(&normed, start_pos, rotary, cache, policy)?;
        let hidden = (hidden + attn_out)?;

        let normed = self.ffn_norm.forward(&hidden, policy)?;
        let ffn_out = self.feed_forward.forward(&normed, policy)?;
        hidden + ffn_out
    }
}
