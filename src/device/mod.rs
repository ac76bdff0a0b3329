//! Accelerator allocator capability and a simulated caching device.

pub mod simulated;

pub use simulated::{DeviceBuffer, DeviceConfig, SimulatedDevice};

/// Query surface of an accelerator's memory allocator.
///
/// The profiler only reads through this trait, so tests and alternative
/// backends can inject their own implementation.
pub trait DeviceAllocator {
    /// Bytes currently held by live allocations.
    fn allocated_bytes(&self) -> u64;

    /// Bytes reserved (cached) by the allocator, including free cached blocks.
    fn reserved_bytes(&self) -> u64;

    /// Highest `allocated_bytes` observed since the last peak reset.
    fn peak_allocated_bytes(&self) -> u64;

    /// Block until all queued device work has retired.
    fn synchronize(&self);
}
