//! Dense projection layers.
//!
//! Linear layers accept inputs shaped `(batch, seq, in_dim)` or `(rows, in_dim)`
//! and return the same layout with the last dimension replaced by `out_dim`.
//! Weights and activations are cast to [`PrecisionPolicy::compute`] for the
//! matmul and the result is cast back to the storage dtype, so callers never
//! see intermediate widths.

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration for a dense projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a bias vector is applied after the matmul.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a bias-free projection configuration, the common case in the
    /// decoder stack.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: false,
        }
    }

    /// Same configuration with the bias enabled.
    pub fn with_bias(mut self) -> Self {
        self.bias = true;
        self
    }
}

/// Weight initialisation recipes for projections.
#[derive(Debug, Clone)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He normal initialisation.
    KaimingNormal { negative_slope: f64 },
}

impl LinearInit {
    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let weight_f32 = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
            LinearInit::KaimingNormal { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let std = gain / fan_in.sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
        };
        if dtype == DType::F32 {
            Ok(weight_f32)
        } else {
            weight_f32.to_dtype(dtype)
        }
    }
}

/// Dense projection with optional bias and mixed-precision aware forward pass.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a linear layer with freshly sampled weights following `init`.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample((config.output_dim, config.input_dim), device, dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Static configuration used to validate inputs.
    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// The `(out_dim, in_dim)` weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Applies the projection, promoting to the compute dtype when needed.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let input = policy.cast_for_matmul(hidden)?;
        let weight_t = policy.cast_for_matmul(&self.weight)?.t()?;
        let dims = input.dims();

        let mut output = match dims {
            [batch, seq, _] => {
                let flat = input.reshape((*batch * *seq, self.config.input_dim))?;
                flat.matmul(&weight_t)?
                    .reshape((*batch, *seq, self.config.output_dim))?
            }
            [rows, _] => input
                .matmul(&weight_t)?
                .reshape((*rows, self.config.output_dim))?,
            _ => unreachable!("validated above"),
        };

        if let Some(bias) = &self.bias {
            let bias = policy.cast_for_matmul(bias)?;
            output = output.broadcast_add(&bias)?;
        }

        policy.cast_to_storage(&output)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in(
            "linear.weight",
            weight,
            &[DType::F16, DType::BF16, DType::F32],
        )?;
        checks::expect_contiguous("linear.weight", weight)?;
        Ok(())
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_rank("linear.bias", tensor, 1)?;
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in(
                    "linear.bias",
                    tensor,
                    &[DType::F16, DType::BF16, DType::F32],
                )?;
                Ok(())
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        let dims = hidden.dims();
        match dims {
            [batch, seq, hidden_dim] => {
                if *hidden_dim != self.config.input_dim {
                    Err(Error::Msg(format!(
                        "linear.input: expected last dim {}, got {}",
                        self.config.input_dim, hidden_dim
                    )))
                } else if *batch == 0 || *seq == 0 {
                    Err(Error::Msg(
                        "linear.input: batch/seq dimensions must be non-zero".into(),
                    ))
                } else {
                    Ok(())
                }
            }
            [_, hidden_dim] => {
                if *hidden_dim != self.config.input_dim {
                    Err(Error::Msg(format!(
                        "linear.input: expected last dim {}, got {}",
                        self.config.input_dim, hidden_dim
                    )))
                } else {
                    Ok(())
                }
            }
            _ => Err(Error::Msg(
                "linear expects input shaped [B, T, H_in] or [T, H_in]".into(),
            )),
        }
    }
}
