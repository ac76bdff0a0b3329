//! Memory profiling wired into the training loop.
//!
//! [`MemStatsCallback`] registers memory hooks once at `before_fit` and turns
//! the log into a normalized table at `after_fit`. [`SinglePassGuard`] keeps
//! the measured run to a single batch without touching the weights.
//! [`profile_fit`] combines both for a one-call profile of a learner.

use super::{Callback, CallbackFlow, Learner, TrainContext};
use crate::device::DeviceAllocator;
use crate::errors::ProfilerError;
use crate::nn::{flatten_model, LayerHandle, Module};
use crate::profiling::{HookRegistry, MemoryTable};
use crate::report;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Cancels the step (after zeroing gradients) and then the whole fit, so
/// exactly one batch runs and no weight is updated.
#[derive(Debug, Default)]
pub struct SinglePassGuard;

impl Callback for SinglePassGuard {
    fn name(&self) -> &str {
        "single_pass_guard"
    }

    fn before_step(&mut self, ctx: &mut TrainContext<'_>) -> Result<CallbackFlow> {
        ctx.model.zero_grad();
        Ok(CallbackFlow::CancelStep)
    }

    fn after_batch(&mut self, _ctx: &mut TrainContext<'_>) -> Result<CallbackFlow> {
        tracing::info!("fit canceled after one batch");
        Ok(CallbackFlow::CancelFit)
    }
}

/// Lifecycle of a [`MemStatsCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unregistered,
    HooksAttached,
    LogFinalized,
}

/// Registers memory hooks on a module subset for the duration of a fit.
pub struct MemStatsCallback {
    allocator: Arc<dyn DeviceAllocator>,
    modules: Option<Vec<LayerHandle>>,
    label: Option<String>,
    remove_end: bool,
    baseline: u64,
    registry: Option<HookRegistry>,
    stats: Option<MemoryTable>,
    state: AdapterState,
}

impl MemStatsCallback {
    pub fn new(allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self {
            allocator,
            modules: None,
            label: None,
            remove_end: true,
            baseline: 0,
            registry: None,
            stats: None,
            state: AdapterState::Unregistered,
        }
    }

    /// Hook exactly these modules instead of every trainable flattened layer.
    pub fn with_modules(mut self, modules: Vec<LayerHandle>) -> Self {
        self.modules = Some(modules);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Leave hooks attached after `after_fit`; call [`detach`](Self::detach) later.
    pub fn keep_hooks(mut self) -> Self {
        self.remove_end = false;
        self
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.registry.as_ref().is_some_and(HookRegistry::is_attached)
    }

    /// Normalized table produced by the last `after_fit`.
    pub fn stats(&self) -> Option<&MemoryTable> {
        self.stats.as_ref()
    }

    pub fn baseline(&self) -> u64 {
        self.baseline
    }

    /// Remove any hooks and return to `Unregistered` so the adapter can be reused.
    pub fn detach(&mut self) {
        if let Some(mut registry) = self.registry.take() {
            registry.detach();
        }
        self.state = AdapterState::Unregistered;
    }

    pub fn plot(&self, path: &Path) -> Result<()> {
        let stats = self
            .stats
            .as_ref()
            .ok_or_else(|| ProfilerError::InvalidState("no memory stats recorded yet".into()))?;
        report::plot::write_svg(path, &[stats])
    }
}

impl Callback for MemStatsCallback {
    fn name(&self) -> &str {
        "mem_stats"
    }

    fn before_fit(&mut self, ctx: &mut TrainContext<'_>) -> Result<CallbackFlow> {
        if self.state != AdapterState::Unregistered {
            return Err(ProfilerError::InvalidState(format!(
                "memory hooks cannot be registered from state {:?}; detach first",
                self.state
            ))
            .into());
        }
        let modules = match &self.modules {
            Some(modules) => modules.clone(),
            None => flatten_model(&*ctx.model)
                .into_iter()
                .filter(LayerHandle::has_trainable_parameters)
                .collect(),
        };
        let label = self
            .label
            .clone()
            .or_else(|| Some(ctx.model.type_name().to_string()));
        self.baseline = self.allocator.allocated_bytes();
        self.registry = Some(HookRegistry::attach(&modules, label, Arc::clone(&self.allocator))?);
        self.stats = None;
        self.state = AdapterState::HooksAttached;
        Ok(CallbackFlow::Continue)
    }

    fn after_fit(&mut self, _ctx: &mut TrainContext<'_>) -> Result<()> {
        if self.state != AdapterState::HooksAttached {
            return Ok(());
        }
        let log = if self.remove_end {
            match self.registry.take() {
                Some(registry) => registry.into_log(),
                None => return Ok(()),
            }
        } else {
            match self.registry.as_mut() {
                Some(registry) => registry.log().clone(),
                None => return Ok(()),
            }
        };
        let table = log.normalize(self.baseline);
        if table.is_empty() {
            tracing::warn!("memory stats callback recorded no hook calls");
        }
        self.stats = Some(table);
        self.state = AdapterState::LogFinalized;
        Ok(())
    }

    fn on_fit_error(&mut self, _ctx: &mut TrainContext<'_>, error: &anyhow::Error) {
        if self.state != AdapterState::HooksAttached {
            return;
        }
        tracing::warn!(%error, "fit failed; memory hooks removed, partial log discarded");
        self.detach();
        self.stats = None;
    }
}

/// Record memory stats for a single forward-and-backward pass of `learner`.
///
/// Hooks every flattened layer, runs one batch with [`SinglePassGuard`]
/// installed, and returns the table normalized against the allocation level
/// just before the fit. Weights are left untouched.
pub fn profile_fit<M: Module>(
    learner: &mut Learner<M>,
    allocator: Arc<dyn DeviceAllocator>,
    label: Option<String>,
) -> Result<MemoryTable> {
    let label = label.unwrap_or_else(|| learner.model().type_name().to_string());
    let modules = flatten_model(learner.model());
    let registry = HookRegistry::attach(&modules, Some(label), Arc::clone(&allocator))?;
    let baseline = allocator.allocated_bytes();
    let mut guard = SinglePassGuard;
    learner.fit(1, &mut [&mut guard])?;
    Ok(registry.into_log().normalize(baseline))
}
