//! Simulated caching allocator with an asynchronous kernel queue.
//!
//! Allocation bookkeeping is synchronous, like a host-side caching allocator.
//! Kernel workspace is stream-ordered: it only shows up in the peak once the
//! queue has been drained with [`DeviceAllocator::synchronize`].

use super::DeviceAllocator;
use crate::errors::ProfilerError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Allocation granularity of the caching allocator.
const DEFAULT_BLOCK_SIZE: u64 = 512;

/// Reservation granularity when the cache has to grow.
const DEFAULT_SEGMENT_SIZE: u64 = 2 * 1024 * 1024;

/// Configuration for a [`SimulatedDevice`].
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Total device memory; `None` means unbounded.
    pub capacity_bytes: Option<u64>,
    /// Every request is rounded up to a multiple of this.
    pub block_size: u64,
    /// Reserved memory grows in multiples of this.
    pub segment_size: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: None,
            block_size: DEFAULT_BLOCK_SIZE,
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

impl DeviceConfig {
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity_bytes = Some(bytes);
        self
    }
}

/// In-process accelerator whose memory counters behave like a caching allocator.
#[derive(Debug, Default)]
pub struct SimulatedDevice {
    config: DeviceConfig,
    allocated: AtomicU64,
    reserved: AtomicU64,
    peak: AtomicU64,
    /// Highest allocated + workspace demand among kernels still queued.
    pending_peak: AtomicU64,
    in_flight: AtomicU64,
    allocation_count: AtomicU64,
}

fn round_up(bytes: u64, granularity: u64) -> u64 {
    if granularity == 0 {
        return bytes;
    }
    bytes.div_ceil(granularity) * granularity
}

impl SimulatedDevice {
    pub fn new(config: DeviceConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            ..Self::default()
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Allocate `bytes` (rounded up to the block size). The returned buffer
    /// gives the memory back when dropped.
    pub fn allocate(self: &Arc<Self>, bytes: u64) -> Result<DeviceBuffer, ProfilerError> {
        let size = round_up(bytes, self.config.block_size);
        let current = self.allocated.load(Ordering::Relaxed);
        if let Some(capacity) = self.config.capacity_bytes {
            if current + size > capacity {
                return Err(ProfilerError::OutOfMemory {
                    requested: size,
                    available: capacity.saturating_sub(current),
                });
            }
        }
        let now = self.allocated.fetch_add(size, Ordering::Relaxed) + size;
        self.peak.fetch_max(now, Ordering::Relaxed);
        self.reserved
            .fetch_max(round_up(now, self.config.segment_size), Ordering::Relaxed);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        Ok(DeviceBuffer {
            device: Arc::clone(self),
            bytes: size,
        })
    }

    fn release(&self, bytes: u64) {
        self.allocated.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Queue a kernel that needs `workspace_bytes` of scratch while it runs.
    pub fn launch_kernel(&self, name: &str, workspace_bytes: u64) {
        let demand = self.allocated.load(Ordering::Relaxed)
            + round_up(workspace_bytes, self.config.block_size);
        self.pending_peak.fetch_max(demand, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(kernel = name, workspace_bytes, "kernel queued");
    }

    pub fn kernels_in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Number of allocations served since creation.
    pub fn allocation_count(&self) -> u64 {
        self.allocation_count.load(Ordering::Relaxed)
    }

    /// Restart peak tracking from the current allocation level.
    pub fn reset_peak(&self) {
        self.peak
            .store(self.allocated.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    /// Return cached but unused segments, shrinking `reserved_bytes`.
    pub fn empty_cache(&self) {
        let live = round_up(
            self.allocated.load(Ordering::Relaxed),
            self.config.segment_size,
        );
        self.reserved.store(live, Ordering::Relaxed);
    }
}

impl DeviceAllocator for SimulatedDevice {
    fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    fn reserved_bytes(&self) -> u64 {
        self.reserved.load(Ordering::Relaxed)
    }

    fn peak_allocated_bytes(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }

    fn synchronize(&self) {
        let pending = self.pending_peak.swap(0, Ordering::Relaxed);
        self.peak.fetch_max(pending, Ordering::Relaxed);
        self.reserved
            .fetch_max(round_up(pending, self.config.segment_size), Ordering::Relaxed);
        self.in_flight.store(0, Ordering::Relaxed);
    }
}

/// Device memory owned by a tensor. Released back to the device on drop.
#[derive(Debug)]
pub struct DeviceBuffer {
    device: Arc<SimulatedDevice>,
    bytes: u64,
}

impl DeviceBuffer {
    /// Rounded size actually charged to the device.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn device(&self) -> &Arc<SimulatedDevice> {
        &self.device
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.device.release(self.bytes);
    }
}
