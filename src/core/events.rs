use std::time::SystemTime;
use serde::{Deserialize, Serialize};

/// One record from a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// `None` when the provider cannot resolve the entry's name.
    pub name: Option<String>,
    /// Last-modified time in epoch milliseconds (or provider-native units).
    pub last_modified: i64,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, last_modified: i64) -> Self {
        Self {
            name: Some(name.into()),
            last_modified,
        }
    }

    pub fn unnamed(last_modified: i64) -> Self {
        Self {
            name: None,
            last_modified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePhase {
    /// First scan that saw the timestamp move.
    Started,
    /// The timestamp held still across two scans.
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectoryEventKind {
    Created,
    Deleted,
    Changed { phase: ChangePhase },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEvent {
    #[serde(flatten)]
    pub kind: DirectoryEventKind,
    /// Affected entry names. Empty for created/deleted events when the
    /// watcher only tracks the entry count.
    pub entries: Vec<String>,
    /// Number of affected entries, known even when `entries` is empty.
    pub count: usize,
    pub timestamp: SystemTime,
}

impl DirectoryEvent {
    pub fn new(kind: DirectoryEventKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            count: 0,
            timestamp: SystemTime::now(),
        }
    }

    pub fn changed(name: impl Into<String>, phase: ChangePhase) -> Self {
        Self::new(DirectoryEventKind::Changed { phase }).with_entries(vec![name.into()])
    }

    pub fn created(count: usize) -> Self {
        Self::new(DirectoryEventKind::Created).with_count(count)
    }

    pub fn deleted(count: usize) -> Self {
        Self::new(DirectoryEventKind::Deleted).with_count(count)
    }

    /// Sets the affected names; `count` follows their number.
    pub fn with_entries(mut self, entries: Vec<String>) -> Self {
        self.count = entries.len();
        self.entries = entries;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn is_changed(&self) -> bool {
        matches!(self.kind, DirectoryEventKind::Changed { .. })
    }

    /// Short label used by log lines and the text output.
    pub fn label(&self) -> &'static str {
        match self.kind {
            DirectoryEventKind::Created => "CREATED",
            DirectoryEventKind::Deleted => "DELETED",
            DirectoryEventKind::Changed { .. } => "CHANGED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_event_carries_single_entry() {
        let event = DirectoryEvent::changed("a.txt", ChangePhase::Started);

        assert_eq!(event.entries, vec!["a.txt".to_string()]);
        assert_eq!(event.count, 1);
        assert!(event.is_changed());
        assert_eq!(event.label(), "CHANGED");
    }

    #[test]
    fn test_count_only_created_event() {
        let event = DirectoryEvent::created(3);

        assert!(event.entries.is_empty());
        assert_eq!(event.count, 3);
        assert!(matches!(event.kind, DirectoryEventKind::Created));
    }

    #[test]
    fn test_with_entries_overrides_count() {
        let event = DirectoryEvent::deleted(7)
            .with_entries(vec!["x".to_string(), "y".to_string()]);

        assert_eq!(event.count, 2);
    }

    #[test]
    fn test_event_json_shape() {
        let event = DirectoryEvent::changed("notes.md", ChangePhase::Settled);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["kind"], "changed");
        assert_eq!(json["phase"], "settled");
        assert_eq!(json["entries"][0], "notes.md");
        assert_eq!(json["count"], 1);
    }
}
