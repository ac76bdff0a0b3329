//! Hook registry: attaches PRE/FORWARD/BACKWARD memory hooks to a flattened
//! model and owns both the resulting log and the lifetime of every hook.
//!
//! Hook callbacks never touch the log directly. Each one sends a [`Snapshot`]
//! over a channel whose only receiver is the registry; the registry drains it
//! into its [`MemoryLog`] in firing order. Dropping the registry detaches all
//! hooks, so every exit path (return, `?`, unwinding) leaves the model clean.

use super::log::MemoryLog;
use super::snapshot::{Snapshot, SnapshotGenerator};
use crate::device::DeviceAllocator;
use crate::errors::ProfilerError;
use crate::nn::{HookHandle, HookPhase, LayerHandle};
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct HookRegistry {
    handles: Vec<HookHandle>,
    receiver: mpsc::UnboundedReceiver<Snapshot>,
    log: MemoryLog,
    experiment_label: Option<String>,
}

impl HookRegistry {
    /// Attach three memory hooks to every module in `modules`; a module's
    /// position in the slice becomes its `layer_index`.
    ///
    /// Fails with [`ProfilerError::UnsupportedModule`] if any module lacks hook
    /// points, after removing whatever was already attached.
    pub fn attach(
        modules: &[LayerHandle],
        experiment_label: Option<String>,
        allocator: Arc<dyn DeviceAllocator>,
    ) -> Result<Self, ProfilerError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let generator = Rc::new(SnapshotGenerator::new(allocator));
        let mut registry = Self {
            handles: Vec::with_capacity(modules.len() * HookPhase::ALL.len()),
            receiver,
            log: MemoryLog::new(),
            experiment_label: experiment_label.clone(),
        };

        for (index, module) in modules.iter().enumerate() {
            let Some(points) = module.hook_points() else {
                registry.detach();
                return Err(ProfilerError::UnsupportedModule {
                    index,
                    layer_type: module.layer_type().to_string(),
                });
            };
            for phase in HookPhase::ALL {
                let sender = sender.clone();
                let generator = Rc::clone(&generator);
                let label = experiment_label.clone();
                let handle = points.register(phase, move |ctx| {
                    let snapshot = generator.capture(index, phase, label.as_deref(), ctx);
                    // A closed channel means the registry is gone; nothing left to record.
                    let _ = sender.send(snapshot);
                });
                registry.handles.push(handle);
            }
        }

        tracing::debug!(
            modules = modules.len(),
            hooks = registry.handles.len(),
            label = ?registry.experiment_label,
            "memory hooks attached"
        );
        Ok(registry)
    }

    /// Remove every hook this registry attached. Safe to call repeatedly.
    pub fn detach(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let removed = self.handles.drain(..).filter(|h| h.remove()).count();
        tracing::debug!(removed, "memory hooks detached");
    }

    pub fn is_attached(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Number of hooks currently attached (three per module).
    pub fn hook_count(&self) -> usize {
        self.handles.len()
    }

    pub fn experiment_label(&self) -> Option<&str> {
        self.experiment_label.as_deref()
    }

    fn drain(&mut self) {
        while let Ok(snapshot) = self.receiver.try_recv() {
            self.log.append(snapshot);
        }
    }

    /// Log collected so far.
    pub fn log(&mut self) -> &MemoryLog {
        self.drain();
        &self.log
    }

    /// Detach, collect everything recorded, and hand the log over.
    pub fn into_log(mut self) -> MemoryLog {
        self.detach();
        self.drain();
        std::mem::take(&mut self.log)
    }
}

impl Drop for HookRegistry {
    fn drop(&mut self) {
        self.detach();
    }
}
