//! Snapshot generator: one allocator reading per hook firing.

use crate::device::DeviceAllocator;
use crate::nn::{HookContext, HookPhase};
use std::sync::Arc;

/// Allocator state at one hook firing, before it is given a call index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub layer_index: usize,
    pub layer_type: String,
    pub experiment_label: Option<String>,
    pub hook_phase: HookPhase,
    pub bytes_allocated: u64,
    pub bytes_reserved: u64,
    pub peak_bytes_allocated: u64,
    pub input_shape: Vec<usize>,
    pub output_shape: Option<Vec<usize>>,
}

/// Reads an injected allocator on behalf of hook callbacks.
pub struct SnapshotGenerator {
    allocator: Arc<dyn DeviceAllocator>,
}

impl SnapshotGenerator {
    pub fn new(allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self { allocator }
    }

    /// Capture the allocator state for `layer_index` at `phase`.
    ///
    /// The device is synchronized before the peak is read, so the peak covers
    /// every kernel issued up to and including this layer.
    pub fn capture(
        &self,
        layer_index: usize,
        phase: HookPhase,
        experiment_label: Option<&str>,
        ctx: &HookContext<'_>,
    ) -> Snapshot {
        let bytes_allocated = self.allocator.allocated_bytes();
        let bytes_reserved = self.allocator.reserved_bytes();
        self.allocator.synchronize();
        let peak_bytes_allocated = self.allocator.peak_allocated_bytes();
        Snapshot {
            layer_index,
            layer_type: ctx.layer_type.to_string(),
            experiment_label: experiment_label.map(str::to_string),
            hook_phase: phase,
            bytes_allocated,
            bytes_reserved,
            peak_bytes_allocated,
            input_shape: ctx.input.shape().to_vec(),
            output_shape: ctx.output.map(|t| t.shape().to_vec()),
        }
    }
}
