//! Leaf layers: `Linear` and `ReLU`.

use super::hooks::HookPoints;
use super::module::Module;
use crate::device::SimulatedDevice;
use crate::errors::ProfilerError;
use crate::tensor::{autocast_dtype, DType, Tensor};
use anyhow::Result;
use rand::Rng;
use std::sync::Arc;

/// Fully connected layer: `y = x W^T + b`, weight `[out, in]`.
///
/// Honors autocast: activations (output and the input saved for backward)
/// are stored in the autocast dtype. Parameters and their gradients stay f32.
#[derive(Debug)]
pub struct Linear {
    in_features: usize,
    out_features: usize,
    weight: Tensor,
    bias: Tensor,
    weight_grad: Option<Tensor>,
    bias_grad: Option<Tensor>,
    saved_input: Option<Tensor>,
    hooks: HookPoints,
}

impl Linear {
    /// Uniform init in `[-1/sqrt(in), 1/sqrt(in)]`.
    pub fn new(
        device: &Arc<SimulatedDevice>,
        in_features: usize,
        out_features: usize,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let weight: Vec<f32> = (0..in_features * out_features)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        let bias: Vec<f32> = (0..out_features)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        Ok(Self {
            in_features,
            out_features,
            weight: Tensor::from_vec(device, weight, &[out_features, in_features], DType::F32)?,
            bias: Tensor::from_vec(device, bias, &[out_features], DType::F32)?,
            weight_grad: None,
            bias_grad: None,
            saved_input: None,
            hooks: HookPoints::new(),
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    pub fn weight_grad(&self) -> Option<&Tensor> {
        self.weight_grad.as_ref()
    }
}

impl Module for Linear {
    fn type_name(&self) -> &str {
        "Linear"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let (n, k) = input.dims2()?;
        if k != self.in_features {
            return Err(ProfilerError::ShapeMismatch {
                expected: vec![n, self.in_features],
                actual: input.shape().to_vec(),
            }
            .into());
        }
        let dtype = autocast_dtype().unwrap_or(DType::F32);
        let x = input.data();
        let w = self.weight.data();
        let b = self.bias.data();
        let mut out = vec![0.0f32; n * self.out_features];
        for i in 0..n {
            let row = &x[i * k..(i + 1) * k];
            for o in 0..self.out_features {
                let wrow = &w[o * k..(o + 1) * k];
                let dot: f32 = row.iter().zip(wrow).map(|(a, b)| a * b).sum();
                out[i * self.out_features + o] = dot + b[o];
            }
        }
        let device = input.device();
        device.launch_kernel(
            "linear_forward",
            (n * self.out_features * dtype.size_bytes()) as u64,
        );
        let output = Tensor::from_vec(device, out, &[n, self.out_features], dtype)?;
        self.saved_input = Some(input.to_dtype(dtype)?);
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let (n, k) = self
            .saved_input
            .as_ref()
            .ok_or_else(|| {
                ProfilerError::InvalidState("Linear::backward called without a forward".to_string())
            })?
            .dims2()?;
        let o_dim = self.out_features;
        if grad_output.shape() != [n, o_dim] {
            return Err(ProfilerError::ShapeMismatch {
                expected: vec![n, o_dim],
                actual: grad_output.shape().to_vec(),
            }
            .into());
        }
        let input = self.saved_input.take().ok_or_else(|| {
            ProfilerError::InvalidState("Linear::backward called without a forward".to_string())
        })?;
        let device = Arc::clone(grad_output.device());
        let g = grad_output.data();
        let x = input.data();

        let mut weight_grad = match self.weight_grad.take() {
            Some(t) => t,
            None => Tensor::zeros(&device, &[o_dim, k], DType::F32)?,
        };
        let mut bias_grad = match self.bias_grad.take() {
            Some(t) => t,
            None => Tensor::zeros(&device, &[o_dim], DType::F32)?,
        };
        {
            let dw = weight_grad.data_mut();
            for i in 0..n {
                for o in 0..o_dim {
                    let go = g[i * o_dim + o];
                    if go == 0.0 {
                        continue;
                    }
                    for j in 0..k {
                        dw[o * k + j] += go * x[i * k + j];
                    }
                }
            }
        }
        {
            let db = bias_grad.data_mut();
            for i in 0..n {
                for o in 0..o_dim {
                    db[o] += g[i * o_dim + o];
                }
            }
        }
        self.weight_grad = Some(weight_grad);
        self.bias_grad = Some(bias_grad);

        let w = self.weight.data();
        let mut dx = vec![0.0f32; n * k];
        for i in 0..n {
            for o in 0..o_dim {
                let go = g[i * o_dim + o];
                for j in 0..k {
                    dx[i * k + j] += go * w[o * k + j];
                }
            }
        }
        device.launch_kernel("linear_backward", (o_dim * k * 4) as u64);
        Tensor::from_vec(&device, dx, &[n, k], grad_output.dtype())
    }

    fn hook_points(&self) -> Option<&HookPoints> {
        Some(&self.hooks)
    }

    fn parameter_count(&self) -> usize {
        self.weight.numel() + self.bias.numel()
    }

    fn zero_grad(&mut self) {
        self.weight_grad = None;
        self.bias_grad = None;
    }

    fn apply_gradients(&mut self, lr: f32) {
        if let Some(g) = &self.weight_grad {
            for (w, g) in self.weight.data_mut().iter_mut().zip(g.data()) {
                *w -= lr * g;
            }
        }
        if let Some(g) = &self.bias_grad {
            for (b, g) in self.bias.data_mut().iter_mut().zip(g.data()) {
                *b -= lr * g;
            }
        }
    }
}

/// Elementwise `max(0, x)`. Saves its output for backward.
#[derive(Debug, Default)]
pub struct ReLU {
    saved_output: Option<Tensor>,
    hooks: HookPoints,
}

impl ReLU {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Module for ReLU {
    fn type_name(&self) -> &str {
        "ReLU"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let out: Vec<f32> = input.data().iter().map(|&x| x.max(0.0)).collect();
        let device = input.device();
        device.launch_kernel("relu_forward", 0);
        let output = Tensor::from_vec(device, out, input.shape(), input.dtype())?;
        self.saved_output = Some(output.try_clone()?);
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let saved = self.saved_output.take().ok_or_else(|| {
            ProfilerError::InvalidState("ReLU::backward called without a forward".to_string())
        })?;
        if saved.shape() != grad_output.shape() {
            return Err(ProfilerError::ShapeMismatch {
                expected: saved.shape().to_vec(),
                actual: grad_output.shape().to_vec(),
            }
            .into());
        }
        let dx: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(saved.data())
            .map(|(&g, &y)| if y > 0.0 { g } else { 0.0 })
            .collect();
        let device = grad_output.device();
        device.launch_kernel("relu_backward", 0);
        Tensor::from_vec(device, dx, grad_output.shape(), grad_output.dtype())
    }

    fn hook_points(&self) -> Option<&HookPoints> {
        Some(&self.hooks)
    }
}
