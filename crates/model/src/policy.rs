//! Capability trait for incremental next-step scoring.

use candle_core::{Result, Tensor};

use crate::decoder::{Decoder, DecoderCache};

/// A model that scores the next step from a context window and an absolute
/// position, carrying per-sequence state between calls.
///
/// Control loops drive implementations generically: create state with
/// [`StepPolicy::begin`], then call [`StepPolicy::step`] once per position.
pub trait StepPolicy {
    /// Mutable per-sequence state threaded through successive steps.
    type State;

    /// Creates state for a fresh sequence.
    fn begin(&self) -> Result<Self::State>;

    /// Scores the next step for `context` at absolute `position`.
    fn step(&self, context: &Tensor, position: usize, state: &mut Self::State) -> Result<Tensor>;
}

impl StepPolicy for Decoder {
    type State = DecoderCache;

    fn begin(&self) -> Result<DecoderCache> {
        self.new_cache()
    }

    fn step(&self, context: &Tensor, position: usize, state: &mut DecoderCache) -> Result<Tensor> {
        self.forward(context, position, state)
    }
}
