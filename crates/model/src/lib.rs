pub mod block;
pub mod config;
pub mod decoder;
pub mod policy;

pub use block::DecoderBlock;
pub use config::ModelConfig;
pub use decoder::{Decoder, DecoderCache};
pub use policy::StepPolicy;
