//! Snapshot diffing for the polling watcher
//!
//! A `ScanState` holds everything one watch session knows about its
//! directory: the last recorded timestamp per entry name, the entries still
//! being written, and the entry count of the previous listing. `scan` turns
//! a fresh listing into the events it implies and advances the state.

use std::collections::{BTreeMap, BTreeSet};
use crate::config::ChangeDetection;
use super::events::{ChangePhase, DirEntry, DirectoryEvent};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanState {
    snapshot: BTreeMap<String, i64>,
    in_flux: BTreeSet<String>,
    entry_count: usize,
}

/// Named entries of a listing. The first occurrence of a duplicated name wins.
fn index_listing(listing: &[DirEntry]) -> BTreeMap<&str, i64> {
    let mut listed = BTreeMap::new();
    for entry in listing {
        if let Some(name) = entry.name.as_deref() {
            listed.entry(name).or_insert(entry.last_modified);
        }
    }
    listed
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Baseline for a new session. Every named entry is considered stable.
    pub fn from_listing(listing: &[DirEntry]) -> Self {
        let snapshot = index_listing(listing)
            .into_iter()
            .map(|(name, modified)| (name.to_string(), modified))
            .collect();

        Self {
            snapshot,
            in_flux: BTreeSet::new(),
            entry_count: listing.len(),
        }
    }

    pub fn snapshot(&self) -> &BTreeMap<String, i64> {
        &self.snapshot
    }

    pub fn in_flux(&self) -> &BTreeSet<String> {
        &self.in_flux
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn clear(&mut self) {
        self.snapshot.clear();
        self.in_flux.clear();
        self.entry_count = 0;
    }

    /// Diffs `listing` against the state and returns the events in emission
    /// order: per-entry changes first, then created/deleted.
    pub fn scan(&mut self, listing: &[DirEntry], detection: ChangeDetection) -> Vec<DirectoryEvent> {
        let listed = index_listing(listing);
        let mut events = self.detect_changes(&listed);

        match detection {
            ChangeDetection::EntryCount => events.extend(self.apply_count_delta(&listed, listing.len())),
            ChangeDetection::SetDifference => events.extend(self.apply_set_difference(&listed, listing.len())),
        }

        debug_assert!(self.in_flux.iter().all(|name| self.snapshot.contains_key(name)));
        events
    }

    /// Two-phase debounce: a timestamp move fires `Started` and parks the
    /// entry in flux; the first scan that sees the same timestamp again
    /// fires `Settled` and releases it.
    fn detect_changes(&mut self, listed: &BTreeMap<&str, i64>) -> Vec<DirectoryEvent> {
        let mut events = Vec::new();

        for (name, recorded) in self.snapshot.iter_mut() {
            let Some(&observed) = listed.get(name.as_str()) else {
                continue;
            };

            if self.in_flux.contains(name) {
                if observed == *recorded {
                    self.in_flux.remove(name);
                    events.push(DirectoryEvent::changed(name.clone(), ChangePhase::Settled));
                } else {
                    // Still being written; settle against the newest timestamp.
                    *recorded = observed;
                }
            } else if observed != *recorded {
                *recorded = observed;
                self.in_flux.insert(name.clone());
                events.push(DirectoryEvent::changed(name.clone(), ChangePhase::Started));
            }
        }

        events
    }

    fn apply_count_delta(&mut self, listed: &BTreeMap<&str, i64>, count: usize) -> Option<DirectoryEvent> {
        if count == self.entry_count {
            return None;
        }

        let event = if count > self.entry_count {
            DirectoryEvent::created(count - self.entry_count)
        } else {
            DirectoryEvent::deleted(self.entry_count - count)
        };
        self.entry_count = count;

        for (&name, &modified) in listed {
            if !self.snapshot.contains_key(name) {
                self.in_flux.insert(name.to_string());
            }
            self.snapshot.insert(name.to_string(), modified);
        }

        Some(event)
    }

    fn apply_set_difference(&mut self, listed: &BTreeMap<&str, i64>, count: usize) -> Vec<DirectoryEvent> {
        let mut events = Vec::new();
        self.entry_count = count;

        let added: Vec<String> = listed
            .keys()
            .filter(|name| !self.snapshot.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        let removed: Vec<String> = self
            .snapshot
            .keys()
            .filter(|name| !listed.contains_key(name.as_str()))
            .cloned()
            .collect();

        if !added.is_empty() {
            for name in &added {
                self.snapshot.insert(name.clone(), listed[name.as_str()]);
                self.in_flux.insert(name.clone());
            }
            events.push(DirectoryEvent::created(added.len()).with_entries(added));
        }

        if !removed.is_empty() {
            for name in &removed {
                self.snapshot.remove(name);
                self.in_flux.remove(name);
            }
            events.push(DirectoryEvent::deleted(removed.len()).with_entries(removed));
        }

        events
    }
}
