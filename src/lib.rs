//! # memprofile-oxidized
//!
//! Per-layer accelerator memory profiling of a neural network's forward and
//! backward passes.
//!
//! ## Architecture
//!
//! - **Device**: simulated caching allocator (allocated / reserved / peak counters,
//!   async kernel queue with `synchronize`) behind the [`DeviceAllocator`] trait
//! - **Layers**: minimal `Module` runtime with PRE / FORWARD / BACKWARD hook points
//!   and a flattening walker that yields the leaf layers in execution order
//! - **Profiling**: hook registry that snapshots allocator state at every hook
//!   call into an ordered log, normalized against a pre-profiling baseline
//! - **Training**: callback-driven learner plus a memory-stats callback and a
//!   single-pass guard that leave the weights untouched
//! - **Report**: CSV / JSON / Chrome trace export, text summaries, SVG plots

pub mod data;
pub mod device;
pub mod errors;
pub mod model;
pub mod nn;
pub mod profiling;
pub mod report;
pub mod tensor;
pub mod train;

pub use data::{simple_dls, DataConfig, DataLoaders, Dataset};
pub use device::{DeviceAllocator, DeviceConfig, SimulatedDevice};
pub use errors::ProfilerError;
pub use model::{simple_model, simple_model_seeded, SimpleModelConfig};
pub use nn::{
    flatten_model, CrossEntropyLoss, HookPhase, LayerHandle, Linear, Loss, Module, ReLU, Sequential,
};
pub use profiling::{HookRegistry, MemoryLog, MemoryRecord, MemoryTable, ProfilingSession, SessionConfig};
pub use report::TableSummary;
pub use tensor::{autocast, DType, Tensor};
pub use train::{
    profile_fit, Callback, CallbackFlow, Learner, LearnerConfig, MemStatsCallback, SinglePassGuard,
};
