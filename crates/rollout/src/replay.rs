//! Replay storage seam and random-data mocks.

use candle_core::{bail, DType, Device, Result, Tensor};
use rand::Rng;

/// One recorded interaction, as stored in a replay buffer.
///
/// `action` is an integer tensor of discretized action bins, scalar for a
/// single-action setup and a vector otherwise. `reward` is a float tensor
/// and `done` a `U8` flag tensor so items batch cleanly.
#[derive(Debug, Clone)]
pub struct Transition {
    pub instruction: String,
    pub state: Tensor,
    pub action: Tensor,
    pub next_state: Tensor,
    pub reward: Tensor,
    pub done: Tensor,
}

/// Indexable source of recorded transitions.
pub trait ReplayDataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Transition>;
}

/// Replay source that fabricates transitions on demand.
///
/// Frames are standard-normal with a channel axis of 3 in front of
/// `frame_shape`, actions are uniform draws over `[0, num_action_bins]`,
/// rewards are uniform over `{0, 1}` and the done flag is a fair coin.
#[derive(Debug, Clone)]
pub struct MockReplayDataset {
    pub length: usize,
    pub num_actions: usize,
    pub num_action_bins: usize,
    pub frame_shape: (usize, usize, usize),
    pub device: Device,
}

impl MockReplayDataset {
    pub fn new(device: Device) -> Self {
        Self {
            length: 10_000,
            num_actions: 1,
            num_action_bins: 256,
            frame_shape: (6, 224, 224),
            device,
        }
    }

    fn random_frames(&self) -> Result<Tensor> {
        let (f0, f1, f2) = self.frame_shape;
        Tensor::randn(0f32, 1f32, (3, f0, f1, f2), &self.device)
    }
}

impl ReplayDataset for MockReplayDataset {
    fn len(&self) -> usize {
        self.length
    }

    fn get(&self, index: usize) -> Result<Transition> {
        if index >= self.length {
            bail!(
                "replay index {} out of range for dataset of length {}",
                index,
                self.length
            );
        }
        let mut rng = rand::thread_rng();
        let bins = self.num_action_bins as i64;

        let action = if self.num_actions == 1 {
            Tensor::new(rng.gen_range(0..=bins), &self.device)?
        } else {
            let draws: Vec<i64> = (0..self.num_actions)
                .map(|_| rng.gen_range(0..=bins))
                .collect();
            Tensor::from_vec(draws, (self.num_actions,), &self.device)?
        };

        Ok(Transition {
            instruction: "please clean the kitchen".to_string(),
            state: self.random_frames()?,
            action,
            next_state: self.random_frames()?,
            reward: Tensor::new(rng.gen_range(0..=1u8) as f32, &self.device)?,
            done: Tensor::new(rng.gen_range(0..=1u8), &self.device)?,
        })
    }
}

/// Multi-step variant of [`MockReplayDataset`].
///
/// `state`, `action` and `reward` gain a leading time axis of `num_steps`;
/// `next_state` stays the single frame stack that follows the window and
/// `done` is all-false across the window.
#[derive(Debug, Clone)]
pub struct MockReplayNStepDataset {
    pub length: usize,
    pub num_steps: usize,
    pub num_actions: usize,
    pub num_action_bins: usize,
    pub frame_shape: (usize, usize, usize),
    pub device: Device,
}

impl MockReplayNStepDataset {
    pub fn new(device: Device) -> Self {
        Self {
            length: 10_000,
            num_steps: 2,
            num_actions: 1,
            num_action_bins: 256,
            frame_shape: (6, 224, 224),
            device,
        }
    }
}

impl ReplayDataset for MockReplayNStepDataset {
    fn len(&self) -> usize {
        self.length
    }

    fn get(&self, index: usize) -> Result<Transition> {
        if index >= self.length {
            bail!(
                "replay index {} out of range for dataset of length {}",
                index,
                self.length
            );
        }
        let mut rng = rand::thread_rng();
        let bins = self.num_action_bins as i64;
        let (f0, f1, f2) = self.frame_shape;
        let steps = self.num_steps;

        let action_shape = if self.num_actions == 1 {
            vec![steps]
        } else {
            vec![steps, self.num_actions]
        };
        let draw_count = action_shape.iter().product::<usize>();
        let draws: Vec<i64> = (0..draw_count).map(|_| rng.gen_range(0..=bins)).collect();

        let rewards: Vec<f32> = (0..steps).map(|_| rng.gen_range(0..=1u8) as f32).collect();

        Ok(Transition {
            instruction: "please clean the kitchen".to_string(),
            state: Tensor::randn(0f32, 1f32, (steps, 3, f0, f1, f2), &self.device)?,
            action: Tensor::from_vec(draws, action_shape, &self.device)?,
            next_state: Tensor::randn(0f32, 1f32, (3, f0, f1, f2), &self.device)?,
            reward: Tensor::from_vec(rewards, (steps,), &self.device)?,
            done: Tensor::zeros((steps,), DType::U8, &self.device)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_dataset() -> MockReplayDataset {
        MockReplayDataset {
            length: 4,
            frame_shape: (2, 3, 3),
            ..MockReplayDataset::new(Device::Cpu)
        }
    }

    #[test]
    fn single_action_items_have_recorded_shapes() -> Result<()> {
        let dataset = tiny_dataset();
        assert_eq!(dataset.len(), 4);

        let item = dataset.get(0)?;
        assert_eq!(item.instruction, "please clean the kitchen");
        assert_eq!(item.state.dims(), &[3, 2, 3, 3]);
        assert_eq!(item.next_state.dims(), &[3, 2, 3, 3]);
        assert_eq!(item.action.rank(), 0);
        assert_eq!(item.action.dtype(), DType::I64);
        assert_eq!(item.reward.rank(), 0);
        assert_eq!(item.done.dtype(), DType::U8);

        let action = item.action.to_scalar::<i64>()?;
        assert!((0..=256).contains(&action));
        let reward = item.reward.to_scalar::<f32>()?;
        assert!(reward == 0.0 || reward == 1.0);
        Ok(())
    }

    #[test]
    fn multi_action_items_carry_a_vector() -> Result<()> {
        let dataset = MockReplayDataset {
            num_actions: 3,
            num_action_bins: 8,
            ..tiny_dataset()
        };
        let item = dataset.get(1)?;
        assert_eq!(item.action.dims(), &[3]);
        for draw in item.action.to_vec1::<i64>()? {
            assert!((0..=8).contains(&draw));
        }
        Ok(())
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let dataset = tiny_dataset();
        assert!(dataset.get(4).is_err());
        assert!(dataset.get(100).is_err());
    }

    #[test]
    fn n_step_items_lead_with_the_time_axis() -> Result<()> {
        let dataset = MockReplayNStepDataset {
            length: 4,
            frame_shape: (2, 3, 3),
            ..MockReplayNStepDataset::new(Device::Cpu)
        };
        let item = dataset.get(0)?;
        assert_eq!(item.state.dims(), &[2, 3, 2, 3, 3]);
        assert_eq!(item.action.dims(), &[2]);
        assert_eq!(item.reward.dims(), &[2]);
        assert_eq!(item.next_state.dims(), &[3, 2, 3, 3]);
        assert_eq!(item.done.dims(), &[2]);
        assert_eq!(item.done.to_vec1::<u8>()?, vec![0, 0]);
        Ok(())
    }

    #[test]
    fn n_step_actions_gain_a_trailing_action_axis() -> Result<()> {
        let dataset = MockReplayNStepDataset {
            length: 4,
            num_steps: 3,
            num_actions: 2,
            frame_shape: (2, 3, 3),
            ..MockReplayNStepDataset::new(Device::Cpu)
        };
        let item = dataset.get(2)?;
        assert_eq!(item.action.dims(), &[3, 2]);
        Ok(())
    }

    #[test]
    fn datasets_are_usable_behind_the_trait() -> Result<()> {
        let sources: Vec<Box<dyn ReplayDataset>> = vec![
            Box::new(tiny_dataset()),
            Box::new(MockReplayNStepDataset {
                length: 2,
                frame_shape: (2, 3, 3),
                ..MockReplayNStepDataset::new(Device::Cpu)
            }),
        ];
        for source in &sources {
            assert!(!source.is_empty());
            let item = source.get(source.len() - 1)?;
            assert!(!item.instruction.is_empty());
        }
        Ok(())
    }
}
