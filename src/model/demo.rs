//! Build the stacked-linear demo model (random weights) for testing and demos.

use super::SimpleModelConfig;
use crate::device::SimulatedDevice;
use crate::nn::{Linear, ReLU, Sequential};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// `hidden_layers` x `Linear(width, width)` followed by `Linear(width, outputs)`.
pub fn simple_model(device: &Arc<SimulatedDevice>, config: &SimpleModelConfig) -> Result<Sequential> {
    simple_model_seeded(device, config, rand::random::<u64>())
}

/// Deterministic variant of [`simple_model`] (for tests and golden outputs).
pub fn simple_model_seeded(
    device: &Arc<SimulatedDevice>,
    config: &SimpleModelConfig,
    seed: u64,
) -> Result<Sequential> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model = Sequential::default();
    for _ in 0..config.hidden_layers {
        model.push(Linear::new(device, config.width, config.width, &mut rng)?);
        if config.activations {
            model.push(ReLU::new());
        }
    }
    model.push(Linear::new(device, config.width, config.outputs, &mut rng)?);
    tracing::debug!(
        layers = model.len(),
        width = config.width,
        outputs = config.outputs,
        "built simple model"
    );
    Ok(model)
}
