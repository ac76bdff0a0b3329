//! Cross-entropy loss with its gradient computed eagerly.

use crate::errors::ProfilerError;
use crate::tensor::{DType, Tensor};
use anyhow::Result;

/// Scalar loss value plus dL/d(logits), ready to feed into `Module::backward`.
#[derive(Debug)]
pub struct Loss {
    pub value: f32,
    pub grad: Tensor,
}

/// Mean softmax cross-entropy over a batch of class indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// `logits` is `[n, classes]`; `targets` holds one class index per row.
    /// Always computed in f32, whatever the logits dtype.
    pub fn forward(&self, logits: &Tensor, targets: &[usize]) -> Result<Loss> {
        let (n, classes) = logits.dims2()?;
        if targets.len() != n {
            return Err(ProfilerError::ShapeMismatch {
                expected: vec![n],
                actual: vec![targets.len()],
            }
            .into());
        }
        if let Some(&bad) = targets.iter().find(|&&t| t >= classes) {
            anyhow::bail!("target class {} out of range for {} classes", bad, classes);
        }
        let x = logits.data();
        let scale = 1.0 / n.max(1) as f32;
        let mut grad = vec![0.0f32; n * classes];
        let mut total = 0.0f32;
        for (i, &target) in targets.iter().enumerate() {
            let row = &x[i * classes..(i + 1) * classes];
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let sum: f32 = row.iter().map(|&v| (v - max).exp()).sum();
            let log_sum = sum.ln() + max;
            total += log_sum - row[target];
            for (c, &v) in row.iter().enumerate() {
                let p = (v - log_sum).exp();
                let onehot = if c == target { 1.0 } else { 0.0 };
                grad[i * classes + c] = (p - onehot) * scale;
            }
        }
        let grad = Tensor::from_vec(logits.device(), grad, &[n, classes], DType::F32)?;
        Ok(Loss {
            value: total * scale,
            grad,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceConfig, SimulatedDevice};

    #[test]
    fn uniform_logits_give_log_classes() {
        let device = SimulatedDevice::new(DeviceConfig::default());
        let logits = Tensor::zeros(&device, &[2, 4], DType::F32).unwrap();
        let loss = CrossEntropyLoss.forward(&logits, &[0, 3]).unwrap();
        assert!((loss.value - 4.0f32.ln()).abs() < 1e-5);
        let row_sum: f32 = loss.grad.data()[..4].iter().sum();
        assert!(row_sum.abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range_target() {
        let device = SimulatedDevice::new(DeviceConfig::default());
        let logits = Tensor::zeros(&device, &[1, 2], DType::F32).unwrap();
        assert!(CrossEntropyLoss.forward(&logits, &[2]).is_err());
        assert!(CrossEntropyLoss.forward(&logits, &[0, 1]).is_err());
    }
}
