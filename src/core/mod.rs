//! Core functionality module
//!
//! Contains directory providers, snapshot diffing, and the polling watcher

pub mod events;
pub mod provider;
pub mod scan;
pub mod watcher;

// Re-export main types
pub use events::{ChangePhase, DirEntry, DirectoryEvent, DirectoryEventKind};
pub use provider::{DirectoryProvider, InMemoryDirectory, LocalDirectory};
pub use scan::ScanState;
pub use watcher::{ChangeCallback, DirectoryWatcher, ScanHealth};
