use candle_core::{Device, Result, Tensor};
use embedding::positional::rope::{apply_rotation, RotaryConfig, RotaryEncoder, RotarySlice};
use proptest::prelude::*;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn rotary_types_are_send_sync() {
    assert_send_sync::<RotaryConfig>();
    assert_send_sync::<RotaryEncoder>();
    assert_send_sync::<RotarySlice>();
}

fn fill(shape: (usize, usize, usize, usize), device: &Device) -> Result<Tensor> {
    let (b, s, h, d) = shape;
    let data: Vec<f32> = (0..b * s * h * d)
        .map(|idx| ((idx as f32) * 0.83).sin() - 0.2)
        .collect();
    Tensor::from_vec(data, shape, device)
}

/// Scalar-loop reference: rotates pair `(2f, 2f + 1)` of each head vector by
/// the angle `(start + t) * base^(-2f / head_dim)`, recomputing angles
/// independently of the encoder's tables.
fn naive_rotation(
    input: &Tensor,
    start: usize,
    base: f64,
) -> Result<Vec<f32>> {
    let (batch, seq_len, heads, head_dim) = input.dims4()?;
    let values = input.flatten_all()?.to_vec1::<f32>()?;
    let mut rotated = vec![0f32; values.len()];
    let half_dim = head_dim / 2;
    for b in 0..batch {
        for t in 0..seq_len {
            for h in 0..heads {
                let offset = ((b * seq_len + t) * heads + h) * head_dim;
                for f in 0..half_dim {
                    let angle = ((start + t) as f64) * base.powf(-((2 * f) as f64) / head_dim as f64);
                    let (sin, cos) = angle.sin_cos();
                    let even = f64::from(values[offset + 2 * f]);
                    let odd = f64::from(values[offset + 2 * f + 1]);
                    rotated[offset + 2 * f] = (even * cos - odd * sin) as f32;
                    rotated[offset + 2 * f + 1] = (odd * cos + even * sin) as f32;
                }
            }
        }
    }
    Ok(rotated)
}

#[test]
fn vectorized_rotation_matches_scalar_loop() -> Result<()> {
    let device = Device::Cpu;
    let config = RotaryConfig::new(8, 32);
    let base = config.base;
    let encoder = RotaryEncoder::new(config, &device)?;

    for &(start, seq_len) in &[(0usize, 4usize), (5, 1), (17, 3)] {
        let input = fill((2, seq_len, 3, 8), &device)?;
        let actual = apply_rotation(&input, &encoder.slice(start, seq_len)?)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        let expected = naive_rotation(&input, start, base)?;
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!(
                (a - e).abs() <= 1e-5,
                "start {}: got {} expected {}",
                start,
                a,
                e
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn table_entries_lie_on_the_unit_circle(
        half_dim in 1usize..12,
        positions in 1usize..48,
    ) {
        let device = Device::Cpu;
        let encoder = RotaryEncoder::new(
            RotaryConfig::new(half_dim * 2, positions),
            &device,
        ).unwrap();
        let slice = encoder.slice(0, positions).unwrap();
        let cos = slice.cos().to_vec2::<f32>().unwrap();
        let sin = slice.sin().to_vec2::<f32>().unwrap();
        for p in 0..positions {
            for f in 0..half_dim {
                let radius = cos[p][f] * cos[p][f] + sin[p][f] * sin[p][f];
                prop_assert!((radius - 1.0).abs() <= 1e-5);
            }
        }
    }

    #[test]
    fn every_frequency_separates_nearby_positions(
        half_dim in 1usize..12,
        p1 in 0usize..40,
        gap in 1usize..8,
    ) {
        let device = Device::Cpu;
        let p2 = p1 + gap;
        let encoder = RotaryEncoder::new(
            RotaryConfig::new(half_dim * 2, p2 + 1),
            &device,
        ).unwrap();
        let slice = encoder.slice(0, p2 + 1).unwrap();
        let cos = slice.cos().to_vec2::<f32>().unwrap();
        let sin = slice.sin().to_vec2::<f32>().unwrap();
        for f in 0..half_dim {
            let distance = (cos[p1][f] - cos[p2][f]).powi(2) + (sin[p1][f] - sin[p2][f]).powi(2);
            prop_assert!(distance > 1e-10, "frequency {} repeats at {} and {}", f, p1, p2);
        }
    }

    #[test]
    fn rotation_keeps_pair_magnitudes(
        half_dim in 1usize..8,
        heads in 1usize..4,
        start in 0usize..16,
    ) {
        let device = Device::Cpu;
        let head_dim = half_dim * 2;
        let encoder = RotaryEncoder::new(
            RotaryConfig::new(head_dim, 24),
            &device,
        ).unwrap();
        let input = fill((1, 2, heads, head_dim), &device).unwrap();
        let rotated = apply_rotation(&input, &encoder.slice(start, 2).unwrap()).unwrap();

        let before = input.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let after = rotated.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for pair in 0..before.len() / 2 {
            let norm_before = before[2 * pair].powi(2) + before[2 * pair + 1].powi(2);
            let norm_after = after[2 * pair].powi(2) + after[2 * pair + 1].powi(2);
            prop_assert!((norm_before - norm_after).abs() <= 1e-4);
        }
    }
}
