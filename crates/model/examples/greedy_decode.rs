//! Greedy token generation with a randomly initialized decoder.
//!
//! Feeds a short prompt one token at a time, then keeps sampling the
//! argmax token until the cache window is full. Run with
//! `RUST_LOG=debug` to see cache allocation and construction logs.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use model::{Decoder, ModelConfig};

fn main() -> Result<()> {
    env_logger::init();

    let device = Device::Cpu;
    let config = ModelConfig {
        vocab_size: Some(64),
        hidden_dim: 32,
        n_layers: 2,
        n_heads: 4,
        n_kv_heads: Some(2),
        max_batch_size: 1,
        max_seq_len: 32,
        dtype: DType::F32,
        device: device.clone(),
        ..ModelConfig::default()
    };
    let max_seq_len = config.max_seq_len;

    let decoder = Decoder::new(config)?;
    let mut cache = decoder.new_cache()?;

    let prompt = [5u32, 17, 3];
    println!("prompt: {:?}", prompt);

    let mut next_token = 0u32;
    for (pos, &token) in prompt.iter().enumerate() {
        let input = Tensor::from_vec(vec![token], (1, 1), &device)?;
        let logits = decoder.forward(&input, pos, &mut cache)?;
        next_token = logits.squeeze(0)?.squeeze(0)?.argmax(0)?.to_scalar::<u32>()?;
    }

    for pos in prompt.len()..max_seq_len {
        println!("position {:>2}: token {}", pos, next_token);
        let input = Tensor::from_vec(vec![next_token], (1, 1), &device)?;
        let logits = decoder.forward(&input, pos, &mut cache)?;
        next_token = logits.squeeze(0)?.squeeze(0)?.argmax(0)?.to_scalar::<u32>()?;
    }

    println!("cache positions written: {}", cache.positions_written());
    Ok(())
}
