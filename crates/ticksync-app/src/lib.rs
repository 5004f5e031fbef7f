//! Application layer for ticksync.
//!
//! This crate holds the sync engine, the cache it reconciles against, the
//! document scanner and the capability traits the engine consumes.

pub mod cache;
mod checks;
pub mod config;
pub mod document;
pub mod edit;
pub mod engine;
pub mod notify;
pub mod plan;
pub mod remote;
pub mod scanner;
pub mod scheduler;

// Re-exports for convenience
pub use cache::{CacheBackend, CacheData, FileMetadata, MemoryBackend, TaskCache, TrackedTask};
pub use config::{MIN_SYNC_INTERVAL_SECS, ProjectConfig, SyncConfig};
pub use document::{DocumentError, DocumentStore};
pub use engine::{SyncEngine, SyncError};
pub use notify::{Notice, NoticeLevel, Notifier, RecordingNotifier, TracingNotifier};
pub use plan::RemotePlan;
pub use remote::{RemoteError, RemoteTaskClient};
pub use scanner::{ItemOp, LineScan, ModifiedTask, NewTask, Orphan, ScanResult, scan, scan_line};
pub use scheduler::run_periodic;
