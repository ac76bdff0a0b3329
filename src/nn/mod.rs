//! Minimal layer runtime: modules, lifecycle hooks, loss, and the flattening walker.

pub mod flatten;
pub mod hooks;
pub mod layers;
pub mod loss;
pub mod module;
pub mod sequential;

pub use flatten::{flatten_model, LayerHandle};
pub use hooks::{HookContext, HookHandle, HookPhase, HookPoints};
pub use layers::{Linear, ReLU};
pub use loss::{CrossEntropyLoss, Loss};
pub use module::{invoke_backward, invoke_forward, Module};
pub use sequential::Sequential;
