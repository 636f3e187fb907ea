//! Incremental key/value storage for one decoder layer.
//!
//! Buffers are allocated once at `(max_batch, max_positions, kv_heads,
//! head_dim)` and written in place as decoding advances. Reads return the
//! causal prefix `[0, upto)` so the attention step never sees positions that
//! have not been written. The cache never grows; writes past the window fail
//! with [`AttentionError::CacheOverflow`].

use candle_core::{DType, Device, Tensor};

use crate::errors::AttentionError;

/// Geometry of one layer's cache buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    /// Maximum number of concurrent sequences.
    pub max_batch: usize,
    /// Number of positions the window covers.
    pub max_positions: usize,
    /// Key/value head count (after grouping, before replication).
    pub kv_heads: usize,
    /// Per-head feature dimensionality.
    pub head_dim: usize,
}

impl CacheLayout {
    /// Creates a layout; dimensions are validated when buffers are allocated.
    pub fn new(max_batch: usize, max_positions: usize, kv_heads: usize, head_dim: usize) -> Self {
        Self {
            max_batch,
            max_positions,
            kv_heads,
            head_dim,
        }
    }
}

/// Preallocated key/value buffers for one decoder layer.
///
/// The cache belongs to exactly one sequence at a time. `reset` clears the
/// written history so the same allocation can serve a fresh sequence.
#[derive(Debug)]
pub struct LayerKvCache {
    layout: CacheLayout,
    keys: Tensor,
    values: Tensor,
    len: usize,
    dtype: DType,
    device: Device,
}

impl LayerKvCache {
    /// Allocates zeroed buffers for the given geometry.
    pub fn new(layout: CacheLayout, dtype: DType, device: &Device) -> Result<Self, AttentionError> {
        if layout.max_batch == 0
            || layout.max_positions == 0
            || layout.kv_heads == 0
            || layout.head_dim == 0
        {
            return Err(AttentionError::invalid_shape(format!(
                "cache layout with zero dimension: {:?}",
                layout
            )));
        }
        let shape = (
            layout.max_batch,
            layout.max_positions,
            layout.kv_heads,
            layout.head_dim,
        );
        let keys = Tensor::zeros(shape, dtype, device)?;
        let values = Tensor::zeros(shape, dtype, device)?;
        log::debug!(
            "kv cache allocated: batch={} positions={} kv_heads={} head_dim={} dtype={:?}",
            layout.max_batch,
            layout.max_positions,
            layout.kv_heads,
            layout.head_dim,
            dtype
        );
        Ok(Self {
            layout,
            keys,
            values,
            len: 0,
            dtype,
            device: device.clone(),
        })
    }

    /// Geometry the buffers were allocated with.
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// One past the highest position written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been written since allocation or the last reset.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Dtype of the stored keys and values.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Writes keys and values shaped `(batch, seq, kv_heads, head_dim)` at
    /// positions `[start, start + seq)` for the first `batch` rows.
    pub fn write(
        &mut self,
        keys: &Tensor,
        values: &Tensor,
        start: usize,
    ) -> Result<(), AttentionError> {
        let (batch, seq_len, heads, head_dim) = keys.dims4()?;
        if values.dims() != keys.dims() {
            return Err(AttentionError::invalid_shape(format!(
                "cache write with keys {:?} but values {:?}",
                keys.dims(),
                values.dims()
            )));
        }
        if batch == 0 || batch > self.layout.max_batch {
            return Err(AttentionError::invalid_shape(format!(
                "cache write batch {} outside 1..={}",
                batch, self.layout.max_batch
            )));
        }
        if heads != self.layout.kv_heads || head_dim != self.layout.head_dim {
            return Err(AttentionError::cache_mismatch(format!(
                "write carries {} heads of dim {}, cache holds {} heads of dim {}",
                heads, head_dim, self.layout.kv_heads, self.layout.head_dim
            )));
        }
        if keys.dtype() != self.dtype || values.dtype() != self.dtype {
            return Err(AttentionError::cache_mismatch(format!(
                "write dtype {:?}/{:?} against cache dtype {:?}",
                keys.dtype(),
                values.dtype(),
                self.dtype
            )));
        }
        let end = start + seq_len;
        if end > self.layout.max_positions {
            return Err(AttentionError::CacheOverflow {
                start,
                end,
                capacity: self.layout.max_positions,
            });
        }

        let ranges = [0..batch, start..end, 0..heads, 0..head_dim];
        self.keys = self.keys.slice_assign(&ranges, keys)?;
        self.values = self.values.slice_assign(&ranges, values)?;
        self.len = self.len.max(end);
        Ok(())
    }

    /// Returns the causal prefix `[0, upto)` of keys and values for the
    /// first `batch` rows.
    pub fn view(&self, batch: usize, upto: usize) -> Result<(Tensor, Tensor), AttentionError> {
        if batch == 0 || batch > self.layout.max_batch {
            return Err(AttentionError::invalid_shape(format!(
                "cache view batch {} outside 1..={}",
                batch, self.layout.max_batch
            )));
        }
        if upto == 0 {
            return Err(AttentionError::invalid_shape(
                "cache view over zero positions".to_string(),
            ));
        }
        if upto > self.layout.max_positions {
            return Err(AttentionError::CacheOverflow {
                start: 0,
                end: upto,
                capacity: self.layout.max_positions,
            });
        }
        if upto > self.len {
            return Err(AttentionError::cache_mismatch(format!(
                "requested prefix [0..{}) but only {} positions written",
                upto, self.len
            )));
        }
        let keys = self.keys.narrow(0, 0, batch)?.narrow(1, 0, upto)?;
        let values = self.values.narrow(0, 0, batch)?.narrow(1, 0, upto)?;
        Ok((keys, values))
    }

    /// Clears the written history so the buffers can serve a fresh sequence.
    pub fn reset(&mut self) -> Result<(), AttentionError> {
        if self.len == 0 {
            return Ok(());
        }
        let shape = (
            self.layout.max_batch,
            self.layout.max_positions,
            self.layout.kv_heads,
            self.layout.head_dim,
        );
        self.keys = Tensor::zeros(shape, self.dtype, &self.device)?;
        self.values = Tensor::zeros(shape, self.dtype, &self.device)?;
        self.len = 0;
        log::debug!("kv cache reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn filled(shape: (usize, usize, usize, usize), offset: f32) -> Tensor {
        let (b, s, h, d) = shape;
        let data: Vec<f32> = (0..b * s * h * d).map(|v| v as f32 + offset).collect();
        Tensor::from_vec(data, shape, &Device::Cpu).unwrap()
    }

    fn small_cache() -> LayerKvCache {
        let layout = CacheLayout::new(2, 4, 2, 3);
        LayerKvCache::new(layout, DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn written_positions_come_back_in_order() -> Result<(), AttentionError> {
        let mut cache = small_cache();
        let k0 = filled((1, 1, 2, 3), 100.0);
        let v0 = filled((1, 1, 2, 3), 200.0);
        cache.write(&k0, &v0, 0)?;
        assert_eq!(cache.len(), 1);

        let k1 = filled((1, 1, 2, 3), 300.0);
        let v1 = filled((1, 1, 2, 3), 400.0);
        cache.write(&k1, &v1, 1)?;
        assert_eq!(cache.len(), 2);

        let (keys, values) = cache.view(1, 2)?;
        assert_eq!(keys.dims(), &[1, 2, 2, 3]);

        let key_rows = keys.flatten_all()?.to_vec1::<f32>()?;
        let expected: Vec<f32> = (0..6)
            .map(|v| v as f32 + 100.0)
            .chain((0..6).map(|v| v as f32 + 300.0))
            .collect();
        assert_eq!(key_rows, expected);

        let value_rows = values.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(value_rows[0], 200.0);
        assert_eq!(value_rows[6], 400.0);
        Ok(())
    }

    #[test]
    fn shorter_prefixes_remain_readable() -> Result<(), AttentionError> {
        let mut cache = small_cache();
        cache.write(&filled((1, 2, 2, 3), 0.0), &filled((1, 2, 2, 3), 0.0), 0)?;
        let (keys, _) = cache.view(1, 1)?;
        assert_eq!(keys.dims(), &[1, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn writes_past_the_window_overflow() {
        let mut cache = small_cache();
        let k = filled((1, 1, 2, 3), 0.0);
        let v = filled((1, 1, 2, 3), 0.0);
        assert!(cache.write(&k, &v, 3).is_ok());
        let err = cache.write(&k, &v, 4).unwrap_err();
        assert!(matches!(
            err,
            AttentionError::CacheOverflow {
                start: 4,
                end: 5,
                capacity: 4
            }
        ));
    }

    #[test]
    fn geometry_disagreements_are_rejected() {
        let mut cache = small_cache();
        let wrong_heads = filled((1, 1, 3, 3), 0.0);
        assert!(matches!(
            cache.write(&wrong_heads, &wrong_heads, 0).unwrap_err(),
            AttentionError::CacheMismatch { .. }
        ));

        let k = filled((1, 1, 2, 3), 0.0);
        let half = k.to_dtype(DType::F16).unwrap();
        assert!(matches!(
            cache.write(&half, &half, 0).unwrap_err(),
            AttentionError::CacheMismatch { .. }
        ));
    }

    #[test]
    fn reading_unwritten_history_fails() {
        let mut cache = small_cache();
        assert!(cache.view(1, 1).is_err());
        cache
            .write(&filled((1, 1, 2, 3), 0.0), &filled((1, 1, 2, 3), 0.0), 0)
            .unwrap();
        assert!(cache.view(1, 1).is_ok());
        assert!(cache.view(1, 2).is_err());
    }

    #[test]
    fn reset_clears_history_and_allows_reuse() -> Result<(), AttentionError> {
        let mut cache = small_cache();
        cache.write(&filled((1, 1, 2, 3), 7.0), &filled((1, 1, 2, 3), 7.0), 0)?;
        cache.write(&filled((1, 1, 2, 3), 8.0), &filled((1, 1, 2, 3), 8.0), 1)?;
        cache.reset()?;
        assert!(cache.is_empty());
        assert!(cache.view(1, 1).is_err());

        cache.write(&filled((1, 1, 2, 3), 9.0), &filled((1, 1, 2, 3), 9.0), 0)?;
        let (keys, _) = cache.view(1, 1)?;
        assert_eq!(keys.flatten_all()?.to_vec1::<f32>()?[0], 9.0);
        Ok(())
    }

    #[test]
    fn batched_rows_are_stored_independently() -> Result<(), AttentionError> {
        let mut cache = small_cache();
        let keys = filled((2, 1, 2, 3), 0.0);
        let values = filled((2, 1, 2, 3), 50.0);
        cache.write(&keys, &values, 0)?;
        let (stored, _) = cache.view(2, 1)?;
        let rows = stored.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(rows[0], 0.0);
        assert_eq!(rows[6], 6.0);
        Ok(())
    }
}
