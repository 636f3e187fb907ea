//! Positional encodings.

pub mod rope;

pub use rope::{apply_rotation, RotaryConfig, RotaryEncoder, RotarySlice};
