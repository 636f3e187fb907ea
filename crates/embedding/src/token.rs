//! Token embedding lookup table.

use candle_core::{bail, DType, Device, Result, Tensor};

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Storage dtype used for the underlying parameters and outputs.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

/// Embedding table mapping token ids to hidden vectors.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Tensor,
}

impl TokenEmbedding {
    /// Builds a new table with rows sampled from `N(0, 1)`.
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if config.hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }

        let shape = (config.vocab_size, config.hidden_dim);
        let initial = Tensor::randn(0f32, 1f32, shape, &config.device)?;
        let weight = if initial.dtype() == config.dtype {
            initial
        } else {
            initial.to_dtype(config.dtype)?
        };

        Ok(Self { config, weight })
    }

    /// Builds the table from an existing `(vocab, hidden)` weight tensor.
    pub fn from_weight(config: TokenEmbeddingConfig, weight: Tensor) -> Result<Self> {
        let expected = [config.vocab_size, config.hidden_dim];
        if weight.dims() != expected {
            bail!(
                "token embedding weight shaped {:?}, expected {:?}",
                weight.dims(),
                expected
            );
        }
        let weight = if weight.dtype() == config.dtype {
            weight
        } else {
            weight.to_dtype(config.dtype)?
        };
        Ok(Self { config, weight })
    }

    /// Configuration used to build the table.
    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// The `(vocab, hidden)` weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Looks up embeddings for integer `token_ids` shaped `[batch, seq]`,
    /// returning `[batch, seq, hidden]` at the storage dtype.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.validate_token_ids(token_ids)?;

        let ids = token_ids.to_dtype(DType::I64)?;
        let flat = ids.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let gathered = self.weight.index_select(&flat, 0)?;
        let mut dims = token_ids.dims().to_vec();
        dims.push(self.config.hidden_dim);
        gathered.reshape(dims)
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<()> {
        let dims = token_ids.dims();
        if dims.len() != 2 {
            bail!(
                "token ids must be shaped [batch, seq], got {:?}",
                dims
            );
        }
        if dims.iter().any(|dim| *dim == 0) {
            bail!("token id dimensions must be non-zero, got {:?}", dims);
        }
        let dtype = token_ids.dtype();
        if !matches!(dtype, DType::U8 | DType::U32 | DType::I64) {
            bail!("token ids must use an integer dtype, got {:?}", dtype);
        }
        Ok(())
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            bail!("encountered negative token id {}", min_id);
        }
        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        if max_id >= self.config.vocab_size as i64 {
            bail!(
                "token id {} exceeds vocab size {}",
                max_id,
                self.config.vocab_size
            );
        }
        Ok(())
    }
}
