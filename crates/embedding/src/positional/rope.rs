//! Rotary position encoding.
//!
//! A [`RotaryEncoder`] owns precomputed cosine and sine tables shaped
//! `(max_positions, head_dim / 2)` in `f32`. Row `p`, column `f` holds the
//! angle `p * base^(-2f / head_dim)` passed through cos/sin. The tables are
//! built once on the host and uploaded to the target device; every decoding
//! step narrows out the rows for its absolute positions instead of
//! recomputing angles.
//!
//! [`apply_rotation`] rotates consecutive feature pairs `(2f, 2f + 1)` of a
//! `(batch, seq, heads, head_dim)` tensor. Queries and keys are each rotated
//! from their own unrotated projection.

use candle_core::{bail, DType, Device, Result, Tensor};

/// Geometry and frequency base for a rotary table.
#[derive(Debug, Clone, PartialEq)]
pub struct RotaryConfig {
    /// Per-head feature dimensionality; must be even so features form pairs.
    pub head_dim: usize,
    /// Number of absolute positions covered by the tables.
    pub max_positions: usize,
    /// Frequency base of the angle spectrum.
    pub base: f64,
}

impl RotaryConfig {
    /// Creates a configuration with the conventional base of ten thousand.
    pub fn new(head_dim: usize, max_positions: usize) -> Self {
        Self {
            head_dim,
            max_positions,
            base: 10_000.0,
        }
    }
}

/// Precomputed cos/sin tables for a fixed window of absolute positions.
#[derive(Debug, Clone)]
pub struct RotaryEncoder {
    config: RotaryConfig,
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEncoder {
    /// Builds the tables on `device`. Angles are evaluated in `f64` and
    /// stored as `f32`.
    pub fn new(config: RotaryConfig, device: &Device) -> Result<Self> {
        if config.head_dim == 0 || config.head_dim % 2 != 0 {
            bail!(
                "rotary head_dim must be even and non-zero, got {}",
                config.head_dim
            );
        }
        if config.max_positions == 0 {
            bail!("rotary table needs at least one position");
        }
        if config.base <= 1.0 {
            bail!("rotary base must exceed one, got {}", config.base);
        }

        let half_dim = config.head_dim / 2;
        let mut inv_freqs = Vec::with_capacity(half_dim);
        for idx in 0..half_dim {
            let exponent = (2 * idx) as f64 / config.head_dim as f64;
            inv_freqs.push(config.base.powf(-exponent));
        }

        let mut cos_data = Vec::with_capacity(config.max_positions * half_dim);
        let mut sin_data = Vec::with_capacity(config.max_positions * half_dim);
        for position in 0..config.max_positions {
            for inv_freq in &inv_freqs {
                let angle = position as f64 * inv_freq;
                cos_data.push(angle.cos() as f32);
                sin_data.push(angle.sin() as f32);
            }
        }

        let shape = (config.max_positions, half_dim);
        let cos = Tensor::from_vec(cos_data, shape, device)?;
        let sin = Tensor::from_vec(sin_data, shape, device)?;
        Ok(Self { config, cos, sin })
    }

    /// Geometry of the tables.
    pub fn config(&self) -> &RotaryConfig {
        &self.config
    }

    /// Number of absolute positions the tables cover.
    pub fn max_positions(&self) -> usize {
        self.config.max_positions
    }

    /// Rows for positions `[start, start + len)`.
    pub fn slice(&self, start: usize, len: usize) -> Result<RotarySlice> {
        let end = start + len;
        if end > self.config.max_positions {
            bail!(
                "rotary positions [{}..{}) exceed table length {}",
                start,
                end,
                self.config.max_positions
            );
        }
        if len == 0 {
            bail!("rotary slice must cover at least one position");
        }
        Ok(RotarySlice {
            cos: self.cos.narrow(0, start, len)?,
            sin: self.sin.narrow(0, start, len)?,
        })
    }
}

/// Cos/sin rows covering one contiguous run of absolute positions.
#[derive(Debug, Clone)]
pub struct RotarySlice {
    cos: Tensor,
    sin: Tensor,
}

impl RotarySlice {
    /// Number of positions covered by this slice.
    pub fn len(&self) -> usize {
        self.cos.dims()[0]
    }

    /// Whether the slice covers no positions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cosine rows, shaped `(len, head_dim / 2)`.
    pub fn cos(&self) -> &Tensor {
        &self.cos
    }

    /// Sine rows, shaped `(len, head_dim / 2)`.
    pub fn sin(&self) -> &Tensor {
        &self.sin
    }
}

/// Rotates consecutive feature pairs of a `(batch, seq, heads, head_dim)`
/// tensor by the angles in `slice`. The rotation runs in `f32` and the
/// result is cast back to the input dtype. Pair norms are preserved.
pub fn apply_rotation(tensor: &Tensor, slice: &RotarySlice) -> Result<Tensor> {
    let (batch, seq_len, heads, head_dim) = tensor.dims4()?;
    if head_dim % 2 != 0 {
        bail!("rotation requires an even head_dim, got {}", head_dim);
    }
    let half_dim = head_dim / 2;
    let table_dims = slice.cos.dims();
    if table_dims != [seq_len, half_dim] {
        bail!(
            "rotary slice shaped {:?} does not cover input with seq_len {} and head_dim {}",
            table_dims,
            seq_len,
            head_dim
        );
    }

    let dtype = tensor.dtype();
    let cos = slice.cos.reshape((1, seq_len, 1, half_dim))?;
    let sin = slice.sin.reshape((1, seq_len, 1, half_dim))?;

    let pairs = tensor
        .to_dtype(DType::F32)?
        .reshape((batch, seq_len, heads, half_dim, 2))?;
    let components = pairs.chunk(2, 4)?;
    let even = components[0].squeeze(4)?;
    let odd = components[1].squeeze(4)?;

    let rotated_even = even.broadcast_mul(&cos)?.sub(&odd.broadcast_mul(&sin)?)?;
    let rotated_odd = odd.broadcast_mul(&cos)?.add(&even.broadcast_mul(&sin)?)?;

    Tensor::cat(&[&rotated_even.unsqueeze(4)?, &rotated_odd.unsqueeze(4)?], 4)?
        .reshape((batch, seq_len, heads, head_dim))?
        .to_dtype(dtype)
}
