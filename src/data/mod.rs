//! Random classification data for the demo training loop.
//!
//! Samples live on the host; the learner uploads one batch at a time to the
//! device, so batch tensors show up in the memory profile like a real loader.

use crate::device::SimulatedDevice;
use crate::tensor::{DType, Tensor};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Host-side dataset of `(features, class)` samples.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    features: Vec<Vec<f32>>,
    labels: Vec<usize>,
}

impl Dataset {
    pub fn new(features: Vec<Vec<f32>>, labels: Vec<usize>) -> Result<Self> {
        if features.len() != labels.len() {
            anyhow::bail!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            );
        }
        if let Some(width) = features.first().map(Vec::len) {
            if features.iter().any(|f| f.len() != width) {
                anyhow::bail!("feature rows have inconsistent widths");
            }
        }
        Ok(Self { features, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn width(&self) -> usize {
        self.features.first().map_or(0, Vec::len)
    }

    /// Contiguous batches of at most `batch_size` samples, in order.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = HostBatch<'_>> + '_ {
        let batch_size = batch_size.max(1);
        self.features
            .chunks(batch_size)
            .zip(self.labels.chunks(batch_size))
            .map(|(features, labels)| HostBatch { features, labels })
    }
}

/// A batch still on the host.
#[derive(Debug, Clone, Copy)]
pub struct HostBatch<'a> {
    pub features: &'a [Vec<f32>],
    pub labels: &'a [usize],
}

impl HostBatch<'_> {
    /// Copy features to `device` as an `[n, width]` f32 tensor.
    pub fn to_device(&self, device: &Arc<SimulatedDevice>) -> Result<Tensor> {
        let width = self.features.first().map_or(0, Vec::len);
        let data: Vec<f32> = self.features.iter().flatten().copied().collect();
        Tensor::from_vec(device, data, &[self.features.len(), width], DType::F32)
    }
}

/// Train/validation split plus the batch size used to iterate it.
#[derive(Debug, Clone)]
pub struct DataLoaders {
    pub train: Dataset,
    pub valid: Dataset,
    pub batch_size: usize,
}

/// Shape of the generated dataset.
#[derive(Debug, Clone)]
pub struct DataConfig {
    pub width: usize,
    pub classes: usize,
    pub train_samples: usize,
    pub valid_samples: usize,
    pub batch_size: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            width: 100,
            classes: 2,
            train_samples: 800,
            valid_samples: 200,
            batch_size: 16,
        }
    }
}

/// Box-Muller sample from N(0, 1).
fn standard_normal(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

fn random_dataset(rng: &mut StdRng, n: usize, width: usize, classes: usize) -> Result<Dataset> {
    let features = (0..n)
        .map(|_| (0..width).map(|_| standard_normal(rng)).collect())
        .collect();
    let labels = (0..n).map(|_| rng.gen_range(0..classes.max(1))).collect();
    Dataset::new(features, labels)
}

/// Gaussian features with uniformly random labels.
pub fn simple_dls(config: &DataConfig, seed: u64) -> Result<DataLoaders> {
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(DataLoaders {
        train: random_dataset(&mut rng, config.train_samples, config.width, config.classes)?,
        valid: random_dataset(&mut rng, config.valid_samples, config.width, config.classes)?,
        batch_size: config.batch_size,
    })
}
