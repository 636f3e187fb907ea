//! Environment seam for action/perception loops.

use candle_core::{bail, Device, Result, Tensor};

/// What an environment hands back after one action is applied.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub reward: f32,
    pub next_state: Tensor,
    pub done: bool,
}

/// A stateful environment the decoder can act in.
///
/// `init` starts an episode and returns the natural-language instruction
/// together with the initial observation. `step` applies the chosen actions
/// and advances the episode.
pub trait Environment {
    fn init(&mut self) -> Result<(String, Tensor)>;

    fn step(&mut self, actions: &Tensor) -> Result<StepOutcome>;
}

/// Stand-in environment that emits random observations.
///
/// Every episode carries the same fixed instruction, states are drawn from a
/// standard normal, and episodes never terminate on their own.
#[derive(Debug, Clone)]
pub struct MockEnvironment {
    state_shape: Vec<usize>,
    device: Device,
}

impl MockEnvironment {
    pub fn new(state_shape: Vec<usize>, device: Device) -> Result<Self> {
        if state_shape.is_empty() {
            bail!("mock environment needs a non-empty state shape");
        }
        Ok(Self {
            state_shape,
            device,
        })
    }

    pub fn state_shape(&self) -> &[usize] {
        &self.state_shape
    }

    fn random_state(&self) -> Result<Tensor> {
        Tensor::randn(0f32, 1f32, self.state_shape.as_slice(), &self.device)
    }
}

impl Environment for MockEnvironment {
    fn init(&mut self) -> Result<(String, Tensor)> {
        Ok(("please clean the kitchen".to_string(), self.random_state()?))
    }

    fn step(&mut self, _actions: &Tensor) -> Result<StepOutcome> {
        let reward = Tensor::randn(0f32, 1f32, (), &self.device)?.to_scalar::<f32>()?;
        Ok(StepOutcome {
            reward,
            next_state: self.random_state()?,
            done: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_returns_instruction_and_state() -> Result<()> {
        let mut env = MockEnvironment::new(vec![3, 4, 4], Device::Cpu)?;
        let (instruction, state) = env.init()?;
        assert_eq!(instruction, "please clean the kitchen");
        assert_eq!(state.dims(), &[3, 4, 4]);
        Ok(())
    }

    #[test]
    fn step_produces_fresh_states_and_never_terminates() -> Result<()> {
        let mut env = MockEnvironment::new(vec![2, 2], Device::Cpu)?;
        let (_, _) = env.init()?;
        let actions = Tensor::zeros((1,), candle_core::DType::I64, &Device::Cpu)?;
        for _ in 0..3 {
            let outcome = env.step(&actions)?;
            assert_eq!(outcome.next_state.dims(), &[2, 2]);
            assert!(!outcome.done);
            assert!(outcome.reward.is_finite());
        }
        Ok(())
    }

    #[test]
    fn empty_state_shape_is_rejected() {
        assert!(MockEnvironment::new(vec![], Device::Cpu).is_err());
    }
}
