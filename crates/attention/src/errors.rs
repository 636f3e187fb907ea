//! Error taxonomy for the attention layer and its cache.

use thiserror::Error;

/// Failures surfaced by attention construction, the forward step, or cache
/// bookkeeping.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// A tensor or configuration value violated a shape contract.
    #[error("invalid shape for {context}")]
    InvalidShape {
        /// Which operand or parameter was malformed.
        context: String,
    },

    /// A write would land past the end of the preallocated cache window.
    #[error("cache write at positions [{start}..{end}) exceeds capacity {capacity}")]
    CacheOverflow {
        /// First position of the rejected write.
        start: usize,
        /// One past the last position of the rejected write.
        end: usize,
        /// Number of positions the cache was allocated for.
        capacity: usize,
    },

    /// The cache geometry does not agree with the layer using it.
    #[error("cache mismatch: {context}")]
    CacheMismatch {
        /// What disagreed.
        context: String,
    },

    /// The requested dtype has no kernel support here.
    #[error("unsupported dtype {requested}")]
    UnsupportedDType {
        /// Name of the rejected dtype.
        requested: String,
    },

    /// An underlying tensor operation failed.
    #[error("{message}")]
    Backend {
        /// Backend error text.
        message: String,
    },
}

impl AttentionError {
    /// Shorthand for shape violations.
    pub fn invalid_shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }

    /// Shorthand for geometry disagreements.
    pub fn cache_mismatch(context: impl Into<String>) -> Self {
        Self::CacheMismatch {
            context: context.into(),
        }
    }
}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}

impl From<AttentionError> for candle_core::Error {
    fn from(err: AttentionError) -> Self {
        candle_core::Error::Msg(err.to_string())
    }
}
