//! Grouped-query self-attention over cached history.
//!
//! One forward call advances a single chunk of positions: project the
//! incoming hidden states, rotate queries and keys (each from its own
//! unrotated projection), append the rotated keys and raw values to the
//! layer cache, then score the queries against every cached position.
//! Key/value heads are shared across query-head groups; [`repeat_kv`]
//! replicates them up to the query head count before the batched matmuls.

use candle_core::{DType, Device, Tensor};
use candle_nn::ops::softmax_last_dim;

use embedding::positional::rope::{apply_rotation, RotarySlice};
use layers::{
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
};

use crate::cache::LayerKvCache;
use crate::errors::AttentionError;

/// Geometry for one grouped-query attention layer.
#[derive(Debug, Clone)]
pub struct AttentionConfig {
    /// Model hidden size.
    pub hidden_dim: usize,
    /// Query head count.
    pub n_heads: usize,
    /// Key/value head count; divides `n_heads`.
    pub n_kv_heads: usize,
    /// Per-head feature dimensionality.
    pub head_dim: usize,
    /// Storage dtype of the projections.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

impl AttentionConfig {
    /// Checks the head geometry is internally consistent.
    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.n_heads == 0 || self.n_kv_heads == 0 {
            return Err(AttentionError::invalid_shape(
                "attention head counts must be non-zero".to_string(),
            ));
        }
        if self.hidden_dim != self.n_heads * self.head_dim {
            return Err(AttentionError::invalid_shape(format!(
                "hidden_dim {} must equal n_heads {} * head_dim {}",
                self.hidden_dim, self.n_heads, self.head_dim
            )));
        }
        if self.n_heads % self.n_kv_heads != 0 {
            return Err(AttentionError::invalid_shape(format!(
                "n_heads {} must be a multiple of n_kv_heads {}",
                self.n_heads, self.n_kv_heads
            )));
        }
        Ok(())
    }

    /// How many query heads share each key/value head.
    pub fn n_rep(&self) -> usize {
        self.n_heads / self.n_kv_heads
    }
}

/// One attention layer: four projections plus the cached scoring step.
#[derive(Debug, Clone)]
pub struct GroupedQueryAttention {
    config: AttentionConfig,
    wq: Linear,
    wk: Linear,
    wv: Linear,
    wo: Linear,
}

impl GroupedQueryAttention {
    /// Builds the layer with freshly sampled projection weights.
    pub fn new(config: AttentionConfig) -> Result<Self, AttentionError> {
        config.validate()?;
        let init = LinearInit::XavierUniform;
        let q_dim = config.n_heads * config.head_dim;
        let kv_dim = config.n_kv_heads * config.head_dim;
        let wq = Linear::with_init(
            LinearConfig::new(config.hidden_dim, q_dim),
            &init,
            &config.device,
            config.dtype,
        )?;
        let wk = Linear::with_init(
            LinearConfig::new(config.hidden_dim, kv_dim),
            &init,
            &config.device,
            config.dtype,
        )?;
        let wv = Linear::with_init(
            LinearConfig::new(config.hidden_dim, kv_dim),
            &init,
            &config.device,
            config.dtype,
        )?;
        let wo = Linear::with_init(
            LinearConfig::new(q_dim, config.hidden_dim),
            &init,
            &config.device,
            config.dtype,
        )?;
        Ok(Self {
            config,
            wq,
            wk,
            wv,
            wo,
        })
    }

    /// Assembles the layer from existing projections, checking their shapes
    /// against the configured geometry.
    pub fn from_projections(
        config: AttentionConfig,
        wq: Linear,
        wk: Linear,
        wv: Linear,
        wo: Linear,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let q_dim = config.n_heads * config.head_dim;
        let kv_dim = config.n_kv_heads * config.head_dim;
        let expectations = [
            ("wq", &wq, config.hidden_dim, q_dim),
            ("wk", &wk, config.hidden_dim, kv_dim),
            ("wv", &wv, config.hidden_dim, kv_dim),
            ("wo", &wo, q_dim, config.hidden_dim),
        ];
        for (name, proj, input_dim, output_dim) in expectations {
            let actual = proj.config();
            if actual.input_dim != input_dim || actual.output_dim != output_dim {
                return Err(AttentionError::invalid_shape(format!(
                    "{} projection {}x{}, expected {}x{}",
                    name, actual.output_dim, actual.input_dim, output_dim, input_dim
                )));
            }
        }
        Ok(Self {
            config,
            wq,
            wk,
            wv,
            wo,
        })
    }

    /// Layer geometry.
    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    /// Advances positions `[start_pos, start_pos + seq)` for `hidden` shaped
    /// `(batch, seq, hidden_dim)`, appending to `cache` and attending over
    /// everything cached so far. Returns `(batch, seq, hidden_dim)`.
    pub fn forward(
        &self,
        hidden: &Tensor,
        start_pos: usize,
        rotary: &RotarySlice,
        cache: &mut LayerKvCache,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor, AttentionError> {
        let (batch, seq_len, width) = hidden.dims3()?;
        if width != self.config.hidden_dim {
            return Err(AttentionError::invalid_shape(format!(
                "attention input width {} against hidden_dim {}",
                width, self.config.hidden_dim
            )));
        }
        if !matches!(hidden.dtype(), DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{:?}", hidden.dtype()),
            });
        }
        if rotary.len() != seq_len {
            return Err(AttentionError::invalid_shape(format!(
                "rotary slice covers {} positions but the input carries {}",
                rotary.len(),
                seq_len
            )));
        }
        let layout = cache.layout();
        if layout.kv_heads != self.config.n_kv_heads || layout.head_dim != self.config.head_dim {
            return Err(AttentionError::cache_mismatch(format!(
                "cache holds {} heads of dim {}, layer needs {} heads of dim {}",
                layout.kv_heads, layout.head_dim, self.config.n_kv_heads, self.config.head_dim
            )));
        }
        if batch > layout.max_batch {
            return Err(AttentionError::invalid_shape(format!(
                "batch {} exceeds cache rows {}",
                batch, layout.max_batch
            )));
        }

        let q = self.wq.forward(hidden, policy)?;
        let k = self.wk.forward(hidden, policy)?;
        let v = self.wv.forward(hidden, policy)?;

        let q = q.reshape((batch, seq_len, self.config.n_heads, self.config.head_dim))?;
        let k = k.reshape((batch, seq_len, self.config.n_kv_heads, self.config.head_dim))?;
        let v = v.reshape((batch, seq_len, self.config.n_kv_heads, self.config.head_dim))?;

        let q = apply_rotation(&q, rotary)?;
        let k = apply_rotation(&k, rotary)?;

        cache.write(&k, &v, start_pos)?;
        let history = start_pos + seq_len;
        let (keys, values) = cache.view(batch, history)?;

        let keys = repeat_kv(keys, self.config.n_rep())?;
        let values = repeat_kv(values, self.config.n_rep())?;

        let q = policy.cast_for_matmul(&q.transpose(1, 2)?.contiguous()?)?;
        let keys = policy.cast_for_matmul(&keys.transpose(1, 2)?.contiguous()?)?;
        let values = policy.cast_for_matmul(&values.transpose(1, 2)?.contiguous()?)?;

        let scale = (self.config.head_dim as f64).sqrt();
        let scores = (q.matmul(&keys.transpose(2, 3)?.contiguous()?)? / scale)?;
        let probs = softmax_full_precision(&scores)?;
        let context = probs.matmul(&values)?;

        let context = context.transpose(1, 2)?.contiguous()?.reshape((
            batch,
            seq_len,
            self.config.n_heads * self.config.head_dim,
        ))?;
        let context = policy.cast_to_storage(&context)?;
        Ok(self.wo.forward(&context, policy)?)
    }
}

/// Duplicates each key/value head `n_rep` times along the head axis of a
/// `(batch, seq, kv_heads, head_dim)` tensor, keeping every source head
/// adjacent to its replicas, so query head `h` reads key/value head
/// `h / n_rep`.
pub fn repeat_kv(tensor: Tensor, n_rep: usize) -> Result<Tensor, AttentionError> {
    if n_rep == 1 {
        return Ok(tensor);
    }
    let (batch, seq_len, kv_heads, head_dim) = tensor.dims4()?;
    let expanded = tensor
        .unsqueeze(3)?
        .expand((batch, seq_len, kv_heads, n_rep, head_dim))?
        .reshape((batch, seq_len, kv_heads * n_rep, head_dim))?;
    Ok(expanded)
}

fn softmax_full_precision(scores: &Tensor) -> Result<Tensor, AttentionError> {
    let dtype = scores.dtype();
    let probs = softmax_last_dim(&scores.to_dtype(DType::F32)?)?;
    if dtype == DType::F32 {
        Ok(probs)
    } else {
        Ok(probs.to_dtype(dtype)?)
    }
}
