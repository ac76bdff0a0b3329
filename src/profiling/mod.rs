//! Memory-hook recording engine: snapshots, hook registry, session, log.

pub mod log;
pub mod registry;
pub mod session;
pub mod snapshot;

pub use log::{MemoryLog, MemoryRecord, MemoryTable};
pub use registry::HookRegistry;
pub use session::{ProfilingSession, SessionConfig};
pub use snapshot::{Snapshot, SnapshotGenerator};
