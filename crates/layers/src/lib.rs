//! Building blocks shared by the decoder stack.
//!
//! Every layer here follows the `(batch, seq, hidden)` activation convention
//! and routes its casts through [`dtypes::PrecisionPolicy`] so that storage,
//! matmul and reduction dtypes stay consistent across the stack.

pub mod activations;
pub mod checks;
pub mod dtypes;
pub mod linear;
pub mod mlp;
pub mod norm;

pub use dtypes::PrecisionPolicy;
