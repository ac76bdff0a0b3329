//! Ordered container of modules.

use super::hooks::HookPoints;
use super::module::{invoke_backward, invoke_forward, Module};
use crate::tensor::Tensor;
use anyhow::Result;

/// Runs its children in order on forward and in reverse on backward.
///
/// Children are invoked through [`invoke_forward`]/[`invoke_backward`], so
/// their lifecycle hooks fire. A `Sequential` has hook points of its own,
/// which fire when it is nested inside another container.
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
    hooks: HookPoints,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Module>>) -> Self {
        Self {
            layers,
            hooks: HookPoints::new(),
        }
    }

    pub fn push(&mut self, layer: impl Module + 'static) {
        self.layers.push(Box::new(layer));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Sequential {
    fn type_name(&self) -> &str {
        "Sequential"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut layers = self.layers.iter_mut();
        let Some(first) = layers.next() else {
            return input.try_clone();
        };
        let mut hidden = invoke_forward(first.as_mut(), input)?;
        for layer in layers {
            hidden = invoke_forward(layer.as_mut(), &hidden)?;
        }
        Ok(hidden)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let mut layers = self.layers.iter_mut().rev();
        let Some(last) = layers.next() else {
            return grad_output.try_clone();
        };
        let mut grad = invoke_backward(last.as_mut(), grad_output)?;
        for layer in layers {
            grad = invoke_backward(layer.as_mut(), &grad)?;
        }
        Ok(grad)
    }

    fn children(&self) -> Vec<&dyn Module> {
        self.layers.iter().map(|l| l.as_ref()).collect()
    }

    fn hook_points(&self) -> Option<&HookPoints> {
        Some(&self.hooks)
    }

    fn is_container(&self) -> bool {
        true
    }

    fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }

    fn zero_grad(&mut self) {
        self.layers.iter_mut().for_each(|l| l.zero_grad());
    }

    fn apply_gradients(&mut self, lr: f32) {
        self.layers.iter_mut().for_each(|l| l.apply_gradients(lr));
    }
}
