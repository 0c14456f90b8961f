//! Backend-agnostic asynchronous random-access storage.
//!
//! A [`Storage`] serializes open/close/destroy against data requests and runs
//! every completion through one pipeline, whatever the backend.

pub mod allocator;
pub mod backend;
pub mod config;
pub mod emitter;
pub mod error;
pub mod idgen;
pub mod pending;
pub mod request;
pub mod storage;

// Re-export storage types for convenience
pub use storage::{ReadyState, Storage, StorageBuilder};

// Re-export request types for convenience
pub use request::{Outcome, Request, RequestInfo, RequestKind};

// Re-export backend types for convenience
pub use backend::{Backend, Capabilities, MemoryBackend, MmapBackend, Stats, ThreadPoolBackend};

// Re-export error types
pub use error::{Error, Result};

// Re-export event types
pub use emitter::{Emitter, Event, EventArgs, EventCallback, ListenerId, Ttl};

pub use allocator::{Allocator, AllocatorStats, CountingAllocator};
pub use config::StorageConfig;
pub use idgen::RequestId;
pub use pending::Pending;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[must_use]
pub fn version() -> &'static str {
    VERSION
}
