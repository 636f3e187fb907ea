//! Single-step autoregressive decoder.

use candle_core::{bail, DType, Result, Tensor};

use attention::{CacheLayout, LayerKvCache};
use embedding::{
    positional::rope::{RotaryConfig, RotaryEncoder},
    token::{TokenEmbedding, TokenEmbeddingConfig},
};
use layers::{
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
    norm::{NormConfig, RmsNorm},
};

use crate::{block::DecoderBlock, config::ModelConfig};

/// Per-sequence decoding state: one key/value buffer pair per decoder layer.
///
/// A handle belongs to exactly one generation stream at a time. Independent
/// streams over the same decoder use independent handles; [`DecoderCache::reset`]
/// returns a handle to its freshly allocated state without reallocating.
pub struct DecoderCache {
    layers: Vec<LayerKvCache>,
}

impl DecoderCache {
    fn new(config: &ModelConfig) -> Result<Self> {
        let layout = CacheLayout::new(
            config.max_batch_size,
            config.max_seq_len,
            config.n_kv_heads(),
            config.head_dim(),
        );
        let mut layers = Vec::with_capacity(config.n_layers);
        for _ in 0..config.n_layers {
            layers.push(LayerKvCache::new(layout.clone(), config.dtype, &config.device)?);
        }
        log::debug!(
            "decoder cache allocated: layers={} batch={} positions={}",
            config.n_layers,
            config.max_batch_size,
            config.max_seq_len
        );
        Ok(Self { layers })
    }

    /// Number of per-layer buffers in this handle.
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// One past the highest position written so far.
    pub fn positions_written(&self) -> usize {
        self.layers.iter().map(LayerKvCache::len).max().unwrap_or(0)
    }

    /// Clears every layer so the handle can serve a fresh sequence.
    pub fn reset(&mut self) -> Result<()> {
        for layer in &mut self.layers {
            layer.reset()?;
        }
        log::debug!("decoder cache reset");
        Ok(())
    }
}

/// Stack of decoder blocks with a token embedding at the bottom and a
/// vocabulary projection at the top.
pub struct Decoder {
    config: ModelConfig,
    vocab_size: usize,
    tok_embedding: TokenEmbedding,
    rotary: RotaryEncoder,
    blocks: Vec<DecoderBlock>,
    final_norm: RmsNorm,
    output: Linear,
    policy: PrecisionPolicy,
}

impl Decoder {
    /// Validates `config` and assembles the full stack on its device.
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let vocab_size = config.vocab()?;
        let policy = PrecisionPolicy::from_parameter_dtype(config.dtype);

        let tok_embedding = TokenEmbedding::new(TokenEmbeddingConfig {
            vocab_size,
            hidden_dim: config.hidden_dim,
            dtype: config.dtype,
            device: config.device.clone(),
        })?;

        // Rows cover twice the configured window so positional headroom
        // outlives the cache window.
        let rotary = RotaryEncoder::new(
            RotaryConfig::new(config.head_dim(), config.max_seq_len * 2),
            &config.device,
        )?;

        let mut blocks = Vec::with_capacity(config.n_layers);
        for _ in 0..config.n_layers {
            blocks.push(DecoderBlock::new(&config)?);
        }

        let norm_config = NormConfig::new(config.hidden_dim).with_epsilon(config.norm_eps);
        let final_norm = RmsNorm::unit_gain(norm_config, config.dtype, &config.device)?;

        let output = Linear::with_init(
            LinearConfig::new(config.hidden_dim, vocab_size),
            &LinearInit::XavierUniform,
            &config.device,
            config.dtype,
        )?;

        log::info!(
            "decoder ready: layers={} hidden={} heads={}/{} head_dim={} vocab={} max_batch={} max_seq={} dtype={:?}",
            config.n_layers,
            config.hidden_dim,
            config.n_heads,
            config.n_kv_heads(),
            config.head_dim(),
            vocab_size,
            config.max_batch_size,
            config.max_seq_len,
            config.dtype
        );

        Ok(Self {
            config,
            vocab_size,
            tok_embedding,
            rotary,
            blocks,
            final_norm,
            output,
            policy,
        })
    }

    /// Configuration the decoder was assembled from.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Output vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Allocates a cache handle matching this decoder's geometry.
    pub fn new_cache(&self) -> Result<DecoderCache> {
        DecoderCache::new(&self.config)
    }

    /// Scores the next step for `token_ids` shaped `[batch, 1]` at absolute
    /// position `start_pos`, writing this position's keys and values into
    /// `cache`. Returns `[batch, 1, vocab]` logits in `f32`.
    ///
    /// Callers advance `start_pos` monotonically within one sequence; the
    /// cache cannot distinguish a revisited position from fresh history.
    pub fn forward(
        &self,
        token_ids: &Tensor,
        start_pos: usize,
        cache: &mut DecoderCache,
    ) -> Result<Tensor> {
        let (batch, seq_len) = match token_ids.dims2() {
            Ok(dims) => dims,
            Err(_) => bail!(
                "token_ids must be shaped [batch, seq], got {:?}",
                token_ids.dims()
            ),
        };
        if seq_len != 1 {
            bail!(
                "decoder steps one position at a time: expected seq_len 1, got {}",
                seq_len
            );
        }
        if batch == 0 {
            bail!("token_ids batch dimension must be non-zero");
        }
        if batch > self.config.max_batch_size {
            bail!(
                "batch {} exceeds configured max_batch_size {}",
                batch,
                self.config.max_batch_size
            );
        }
        let end = start_pos + seq_len;
        if end > self.config.max_seq_len {
            bail!(
                "positions [{}..{}) overflow max_seq_len {}",
                start_pos,
                end,
                self.config.max_seq_len
            );
        }
        if cache.n_layers() != self.blocks.len() {
            bail!(
                "cache handle has {} layers but the decoder has {}",
                cache.n_layers(),
                self.blocks.len()
            );
        }

        let rotary = self.rotary.slice(start_pos, seq_len)?;
        let mut hidden = self.tok_embedding.forward(token_ids)?;
        for (block, layer_cache) in self.blocks.iter().zip(cache.layers.iter_mut()) {
            hidden = block.forward(&hidden, start_pos, &rotary, layer_cache, &self.policy)?;
        }

        let normed = self.final_norm.forward(&hidden, &self.policy)?;
        let logits = self.output.forward(&normed, &self.policy)?;
        logits.to_dtype(DType::F32)
    }
}
