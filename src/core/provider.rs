use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::UNIX_EPOCH;
use anyhow::{anyhow, Context, Result};
use super::events::DirEntry;

/// A flat directory that can be listed but not subscribed to.
pub trait DirectoryProvider: Send + Sync {
    /// Lists every entry with its name and last-modified time.
    fn list(&self) -> Result<Vec<DirEntry>>;

    /// Human readable identity used in log lines.
    fn describe(&self) -> String {
        "<directory>".to_string()
    }
}

/// Local filesystem directory, listed one level deep.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    path: PathBuf,
}

impl LocalDirectory {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl DirectoryProvider for LocalDirectory {
    fn list(&self) -> Result<Vec<DirEntry>> {
        let reader = fs::read_dir(&self.path)
            .with_context(|| format!("Failed to list directory {}", self.path.display()))?;

        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry
                .with_context(|| format!("Failed to read entry in {}", self.path.display()))?;
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
            let millis = match modified.duration_since(UNIX_EPOCH) {
                Ok(elapsed) => elapsed.as_millis() as i64,
                Err(before) => -(before.duration().as_millis() as i64),
            };

            entries.push(DirEntry {
                name: entry.file_name().into_string().ok(),
                last_modified: millis,
            });
        }

        Ok(entries)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: Vec<DirEntry>,
    pending_failures: VecDeque<String>,
    list_calls: usize,
}

/// Scriptable in-memory directory.
///
/// Clones share the same contents, so a test can keep one handle while the
/// watcher polls another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    label: String,
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryDirectory {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Arc::default(),
        }
    }

    pub fn with_entries(label: impl Into<String>, entries: Vec<DirEntry>) -> Self {
        let dir = Self::new(label);
        dir.replace(entries);
        dir
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not take the directory down with it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts an entry or updates its timestamp.
    pub fn upsert(&self, name: &str, last_modified: i64) {
        let mut state = self.lock();
        let existing = state
            .entries
            .iter()
            .position(|entry| entry.name.as_deref() == Some(name));
        match existing {
            Some(index) => state.entries[index].last_modified = last_modified,
            None => state.entries.push(DirEntry::new(name, last_modified)),
        }
    }

    pub fn push_unnamed(&self, last_modified: i64) {
        self.lock().entries.push(DirEntry::unnamed(last_modified));
    }

    /// Returns whether an entry with that name existed.
    pub fn remove(&self, name: &str) -> bool {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|entry| entry.name.as_deref() != Some(name));
        state.entries.len() != before
    }

    pub fn replace(&self, entries: Vec<DirEntry>) {
        self.lock().entries = entries;
    }

    /// Makes the next `list` call fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().pending_failures.push_back(message.into());
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }
}

impl DirectoryProvider for InMemoryDirectory {
    fn list(&self) -> Result<Vec<DirEntry>> {
        let mut state = self.lock();
        state.list_calls += 1;
        if let Some(message) = state.pending_failures.pop_front() {
            return Err(anyhow!(message))
                .with_context(|| format!("Failed to list directory {}", self.label));
        }
        Ok(state.entries.clone())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
