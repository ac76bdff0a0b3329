//! Model structure walker: flatten nested containers into their leaf layers.

use super::hooks::HookPoints;
use super::module::Module;

/// Detached view of one flattened layer: enough to attach hooks and decide
/// whether the layer is worth profiling, without borrowing the model.
#[derive(Debug, Clone)]
pub struct LayerHandle {
    layer_type: String,
    hook_points: Option<HookPoints>,
    trainable: bool,
}

impl LayerHandle {
    pub fn of(module: &dyn Module) -> Self {
        Self {
            layer_type: module.type_name().to_string(),
            hook_points: module.hook_points().cloned(),
            trainable: module.has_trainable_parameters(),
        }
    }

    pub fn layer_type(&self) -> &str {
        &self.layer_type
    }

    pub fn hook_points(&self) -> Option<&HookPoints> {
        self.hook_points.as_ref()
    }

    pub fn supports_lifecycle_hooks(&self) -> bool {
        self.hook_points.is_some()
    }

    pub fn has_trainable_parameters(&self) -> bool {
        self.trainable
    }
}

/// Leaf layers of `model` in depth-first order. A bare layer is its own single
/// leaf; an empty container has none.
pub fn flatten_model(model: &dyn Module) -> Vec<LayerHandle> {
    if !model.is_container() {
        return vec![LayerHandle::of(model)];
    }
    model.children().into_iter().flat_map(flatten_model).collect()
}
