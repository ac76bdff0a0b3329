//! One-shot profiling session: a single forward+backward pass under memory hooks.

use super::log::MemoryTable;
use super::registry::HookRegistry;
use crate::device::DeviceAllocator;
use crate::nn::{flatten_model, Loss, Module};
use crate::report;
use crate::tensor::{autocast, DType};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Knobs for [`ProfilingSession::run`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Experiment label stamped on every record; defaults to the model's type name.
    pub label: Option<String>,
    /// Run the forward pass under bf16 autocast.
    pub reduced_precision: bool,
    /// Run the backward pass. Without it only PRE and FORWARD records exist.
    pub backward: bool,
    /// Write an SVG plot of the finished table here.
    pub plot_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: None,
            reduced_precision: false,
            backward: true,
            plot_path: None,
        }
    }
}

impl SessionConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_reduced_precision(mut self, enabled: bool) -> Self {
        self.reduced_precision = enabled;
        self
    }

    pub fn forward_only(mut self) -> Self {
        self.backward = false;
        self
    }

    pub fn with_plot(mut self, path: impl Into<PathBuf>) -> Self {
        self.plot_path = Some(path.into());
        self
    }
}

/// Records memory stats for one forward-and-backward pass through a model.
pub struct ProfilingSession {
    allocator: Arc<dyn DeviceAllocator>,
    config: SessionConfig,
}

impl ProfilingSession {
    pub fn new(allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self {
            allocator,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Profile one pass. `forward_fn` runs the model (through
    /// [`Module::call`] so the model's own hooks fire) and returns the loss;
    /// its gradient seeds the backward pass. Gradients are cleared afterwards
    /// and no parameter update happens.
    ///
    /// On an error from `forward_fn` or the backward pass, gradients are
    /// cleared and hooks removed before the error propagates; the partial log
    /// is discarded.
    pub fn run<M, F>(&self, model: &mut M, forward_fn: F) -> Result<MemoryTable>
    where
        M: Module,
        F: FnOnce(&mut M) -> Result<Loss>,
    {
        let label = self
            .config
            .label
            .clone()
            .unwrap_or_else(|| model.type_name().to_string());
        let modules = flatten_model(&*model);
        let baseline = self.allocator.allocated_bytes();
        let registry = HookRegistry::attach(&modules, Some(label.clone()), Arc::clone(&self.allocator))?;

        let pass = self.single_pass(model, forward_fn);
        model.zero_grad();
        pass?;

        let table = registry.into_log().normalize(baseline);
        if table.is_empty() {
            tracing::warn!(label = %label, "memory profile recorded no hook calls");
        } else {
            tracing::info!(
                label = %label,
                records = table.len(),
                layers = modules.len(),
                baseline,
                "memory profile complete"
            );
        }
        if let Some(path) = &self.config.plot_path {
            report::plot::write_svg(path, &[&table])?;
        }
        Ok(table)
    }

    fn single_pass<M, F>(&self, model: &mut M, forward_fn: F) -> Result<()>
    where
        M: Module,
        F: FnOnce(&mut M) -> Result<Loss>,
    {
        let loss = {
            let _autocast = self.config.reduced_precision.then(|| autocast(DType::BF16));
            forward_fn(model)?
        };
        if self.config.backward {
            model.call_backward(&loss.grad)?;
        }
        Ok(())
    }
}
