//! The `Module` trait and hook-aware invocation.

use super::hooks::{HookContext, HookPhase, HookPoints};
use crate::tensor::Tensor;
use anyhow::Result;

/// A layer or container with a forward pass and a manual backward pass.
///
/// Layers keep whatever they need for backward (saved inputs, masks) from the
/// most recent `forward` call.
pub trait Module {
    /// Runtime type name, e.g. `"Linear"`.
    fn type_name(&self) -> &str;

    fn forward(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Given dL/d(output), accumulate parameter gradients and return dL/d(input).
    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor>;

    /// Direct children; empty for leaf layers.
    fn children(&self) -> Vec<&dyn Module> {
        Vec::new()
    }

    /// Lifecycle hook points, or `None` if this layer cannot be hooked.
    fn hook_points(&self) -> Option<&HookPoints> {
        None
    }

    fn has_trainable_parameters(&self) -> bool {
        self.parameter_count() > 0
    }

    fn parameter_count(&self) -> usize {
        0
    }

    /// Drop accumulated gradients, releasing their memory.
    fn zero_grad(&mut self) {}

    /// Plain SGD update from accumulated gradients.
    fn apply_gradients(&mut self, _lr: f32) {}

    /// Containers are never profiled themselves, even when they hold no layers.
    fn is_container(&self) -> bool {
        false
    }

    /// Forward pass with this module's own PRE and FORWARD hooks fired.
    /// Entry point for callers driving a whole model.
    fn call(&mut self, input: &Tensor) -> Result<Tensor>
    where
        Self: Sized,
    {
        invoke_forward(self, input)
    }

    /// Backward pass with this module's own BACKWARD hooks fired.
    fn call_backward(&mut self, grad_output: &Tensor) -> Result<Tensor>
    where
        Self: Sized,
    {
        invoke_backward(self, grad_output)
    }
}

/// Run `module.forward`, firing its PRE and FORWARD hooks around it.
pub fn invoke_forward(module: &mut dyn Module, input: &Tensor) -> Result<Tensor> {
    if let Some(points) = module.hook_points() {
        points.fire(&HookContext {
            layer_type: module.type_name(),
            phase: HookPhase::Pre,
            input,
            output: None,
        });
    }
    let output = module.forward(input)?;
    if let Some(points) = module.hook_points() {
        points.fire(&HookContext {
            layer_type: module.type_name(),
            phase: HookPhase::Forward,
            input,
            output: Some(&output),
        });
    }
    Ok(output)
}

/// Run `module.backward`, firing its BACKWARD hooks afterwards.
pub fn invoke_backward(module: &mut dyn Module, grad_output: &Tensor) -> Result<Tensor> {
    let grad_input = module.backward(grad_output)?;
    if let Some(points) = module.hook_points() {
        points.fire(&HookContext {
            layer_type: module.type_name(),
            phase: HookPhase::Backward,
            input: &grad_input,
            output: Some(grad_output),
        });
    }
    Ok(grad_input)
}
