//! Lightweight validation helpers shared across layer components.
//!
//! Each helper takes the tensor's role name so error messages point at the
//! offending operand. They return `candle_core::Result<()>` so call sites
//! can propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(name: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{}: expected shape {:?}, got {:?}",
            name, expected, actual
        )))
    }
}

/// Ensures a tensor has the expected number of dimensions.
pub fn expect_rank(name: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let actual = tensor.rank();
    if actual == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{}: expected rank {}, got {} (shape {:?})",
            name,
            rank,
            actual,
            tensor.dims()
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(name: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    let dims = tensor.dims();
    match dims {
        [_, _, actual_hidden] if *actual_hidden == hidden => Ok(()),
        _ => Err(Error::Msg(format!(
            "{}: expected (batch, seq, {}) layout, got {:?}",
            name, hidden, dims
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(name: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.iter().any(|candidate| *candidate == dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{}: expected dtype in {:?}, got {:?}",
            name, allowed, dtype
        )))
    }
}

/// Checks the tensor owns a contiguous layout.
pub fn expect_contiguous(name: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{}: expected contiguous layout", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn shape_check_names_the_operand() -> Result<()> {
        let tensor = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
        assert!(expect_shape("proj.weight", &tensor, &[2, 3]).is_ok());
        let err = expect_shape("proj.weight", &tensor, &[3, 2]).unwrap_err();
        assert!(err.to_string().contains("proj.weight"));
        Ok(())
    }

    #[test]
    fn batch_seq_hidden_accepts_any_leading_dims() -> Result<()> {
        let tensor = Tensor::zeros((4, 7, 16), DType::F32, &Device::Cpu)?;
        assert!(expect_batch_seq_hidden("input", &tensor, 16).is_ok());
        assert!(expect_batch_seq_hidden("input", &tensor, 8).is_err());
        let flat = Tensor::zeros((4, 16), DType::F32, &Device::Cpu)?;
        assert!(expect_batch_seq_hidden("input", &flat, 16).is_err());
        Ok(())
    }

    #[test]
    fn dtype_and_rank_checks_reject_mismatches() -> Result<()> {
        let tensor = Tensor::zeros((2, 2), DType::F32, &Device::Cpu)?;
        assert!(expect_dtype_in("input", &tensor, &[DType::F32, DType::F16]).is_ok());
        assert!(expect_dtype_in("input", &tensor, &[DType::I64]).is_err());
        assert!(expect_rank("input", &tensor, 2).is_ok());
        assert!(expect_rank("input", &tensor, 3).is_err());
        Ok(())
    }
}
