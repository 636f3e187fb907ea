//! Environment and replay interfaces for decoder-driven control loops.
//!
//! The decoder consumes observations and emits action scores; everything on
//! the other side of that loop lives here. `Environment` is the seam a real
//! simulator or robot bridge implements, `ReplayDataset` the seam a recorded
//! trajectory store implements. The mock implementations return random
//! tensors with the right shapes so the surrounding pipeline can be exercised
//! without any real environment attached.

pub mod env;
pub mod replay;

pub use env::{Environment, MockEnvironment, StepOutcome};
pub use replay::{MockReplayDataset, MockReplayNStepDataset, ReplayDataset, Transition};
