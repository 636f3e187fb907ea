//! Decoder assembly configuration.

use candle_core::{DType, Device, Error, Result};

/// Assembly-time configuration for the incremental decoder.
///
/// Defaults describe a full-size model; unit-scale setups override the
/// geometry fields. `vocab_size` stays unset until the tokenizer side is
/// known and construction fails without it.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model hidden size.
    pub hidden_dim: usize,
    /// Number of decoder blocks.
    pub n_layers: usize,
    /// Query head count per block.
    pub n_heads: usize,
    /// Key/value head count; `None` reuses `n_heads` (no grouping).
    pub n_kv_heads: Option<usize>,
    /// Output vocabulary size; must be set before construction.
    pub vocab_size: Option<usize>,
    /// Rounding granularity for the feed-forward intermediate width.
    pub multiple_of: usize,
    /// Optional scale applied to the feed-forward width before rounding.
    pub ffn_dim_multiplier: Option<f32>,
    /// Stabiliser for the RMS norms.
    pub norm_eps: f64,
    /// Largest batch a cache handle will serve.
    pub max_batch_size: usize,
    /// Largest number of positions a sequence may occupy.
    pub max_seq_len: usize,
    /// Parameter storage dtype.
    pub dtype: DType,
    /// Device hosting parameters, caches and activations.
    pub device: Device,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 4096,
            n_layers: 32,
            n_heads: 32,
            n_kv_heads: None,
            vocab_size: None,
            multiple_of: 256,
            ffn_dim_multiplier: None,
            norm_eps: 1e-5,
            max_batch_size: 32,
            max_seq_len: 2048,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }
}

impl ModelConfig {
    /// The resolved vocabulary size, or an error when it was never set.
    pub fn vocab(&self) -> Result<usize> {
        self.vocab_size
            .ok_or_else(|| Error::Msg("vocab_size must be set before building the decoder".into()))
    }

    /// Per-head feature dimensionality.
    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.n_heads
    }

    /// Effective key/value head count.
    pub fn n_kv_heads(&self) -> usize {
        self.n_kv_heads.unwrap_or(self.n_heads)
    }

    /// How many query heads share each key/value head.
    pub fn n_rep(&self) -> usize {
        self.n_heads / self.n_kv_heads()
    }

    /// Checks every structural invariant the decoder relies on.
    pub fn validate(&self) -> Result<()> {
        let vocab = self.vocab()?;
        if vocab == 0 {
            return Err(Error::Msg("vocab_size must be greater than zero".into()));
        }
        if self.hidden_dim == 0 {
            return Err(Error::Msg("hidden_dim must be greater than zero".into()));
        }
        if self.n_layers == 0 {
            return Err(Error::Msg("n_layers must be greater than zero".into()));
        }
        if self.n_heads == 0 {
            return Err(Error::Msg("n_heads must be greater than zero".into()));
        }
        if self.hidden_dim % self.n_heads != 0 {
            return Err(Error::Msg(format!(
                "hidden_dim ({}) must be divisible by n_heads ({})",
                self.hidden_dim, self.n_heads
            )));
        }
        if self.head_dim() % 2 != 0 {
            return Err(Error::Msg(format!(
                "head dimension ({}) must be even to form rotation pairs",
                self.head_dim()
            )));
        }
        if let Some(kv) = self.n_kv_heads {
            if kv == 0 {
                return Err(Error::Msg("n_kv_heads must be greater than zero".into()));
            }
            if kv > self.n_heads {
                return Err(Error::Msg(format!(
                    "n_kv_heads ({}) must not exceed n_heads ({})",
                    kv, self.n_heads
                )));
            }
            if self.n_heads % kv != 0 {
                return Err(Error::Msg(format!(
                    "n_heads ({}) must be a multiple of n_kv_heads ({})",
                    self.n_heads, kv
                )));
            }
        }
        if self.multiple_of == 0 {
            return Err(Error::Msg("multiple_of must be greater than zero".into()));
        }
        if let Some(multiplier) = self.ffn_dim_multiplier {
            if multiplier <= 0.0 {
                return Err(Error::Msg(format!(
                    "ffn_dim_multiplier ({}) must be positive",
                    multiplier
                )));
            }
        }
        if self.norm_eps <= 0.0 {
            return Err(Error::Msg(format!(
                "norm_eps ({}) must be positive",
                self.norm_eps
            )));
        }
        if self.max_batch_size == 0 {
            return Err(Error::Msg("max_batch_size must be greater than zero".into()));
        }
        if self.max_seq_len == 0 {
            return Err(Error::Msg("max_seq_len must be greater than zero".into()));
        }
        Ok(())
    }
}
