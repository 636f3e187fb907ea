//! Grouped-query attention for incremental decoding.
//!
//! The crate covers one attention layer of the decoder: the query, key,
//! value and output projections, the rotary-aware scaled-dot-product step,
//! and the per-layer key/value cache that accumulates history one position
//! at a time. Activations enter and leave as `(batch, seq, hidden)` tensors;
//! per-head work happens in `(batch, heads, seq, head_dim)` layout and the
//! cache stores `(batch, position, kv_head, head_dim)`. Softmax always runs
//! in `f32` regardless of the storage dtype.

pub mod cache;
pub mod errors;
pub mod gqa;

pub use cache::{CacheLayout, LayerKvCache};
pub use errors::AttentionError;
pub use gqa::{repeat_kv, AttentionConfig, GroupedQueryAttention};
