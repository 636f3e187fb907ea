//! Dtype discipline for the decoding stack.
//!
//! Parameters may be stored in `f16`/`bf16` while matmuls and statistics run
//! in `f32`. [`PrecisionPolicy`] names the three dtypes involved so every
//! layer casts the same way: promote before compute or reduction, cast back
//! to storage before handing an activation to the next layer.

use candle_core::{DType, Result, Tensor};

/// Storage, compute and reduction dtypes for one decoding pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Constructs a policy from explicit dtype selections.
    pub fn new(storage: DType, compute: DType, reduction: DType) -> Self {
        Self {
            storage,
            compute,
            reduction,
        }
    }

    /// Derives the policy from the parameter storage dtype. Half precision
    /// parameters are promoted to `f32` for compute; reductions always run
    /// in `f32`.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self::new(storage, compute, DType::F32)
    }

    /// Dtype parameters and activations are held in between layers.
    pub fn storage(&self) -> DType {
        self.storage
    }

    /// Dtype used for matmuls and activation evaluation.
    pub fn compute(&self) -> DType {
        self.compute
    }

    /// Dtype used for statistics such as normalization variances.
    pub fn reduction(&self) -> DType {
        self.reduction
    }

    /// Whether any phase runs at a different width than storage.
    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute || self.compute != self.reduction
    }

    /// Casts a tensor to the compute dtype ahead of a matmul.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor to the reduction dtype ahead of statistics.
    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.reduction)
    }

    /// Casts a tensor back to the storage dtype.
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}
