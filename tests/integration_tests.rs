use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use pollwatch::core::{
    ChangePhase, DirEntry, DirectoryEvent, DirectoryEventKind, DirectoryWatcher, InMemoryDirectory,
    ScanState,
};
use pollwatch::config::{ChangeDetection, WatcherConfig};

const STARTED: DirectoryEventKind = DirectoryEventKind::Changed { phase: ChangePhase::Started };
const SETTLED: DirectoryEventKind = DirectoryEventKind::Changed { phase: ChangePhase::Settled };

fn kinds(events: &[DirectoryEvent]) -> Vec<DirectoryEventKind> {
    events.iter().map(|event| event.kind).collect()
}

fn entries(pairs: &[(&str, i64)]) -> Vec<DirEntry> {
    pairs.iter().map(|(name, modified)| DirEntry::new(*name, *modified)).collect()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_edit_create_delete_walkthrough() {
    let mut state = ScanState::from_listing(&entries(&[("a.txt", 100)]));
    let mode = ChangeDetection::EntryCount;

    // Scan 2: a.txt was touched.
    let events = state.scan(&entries(&[("a.txt", 200)]), mode);
    assert_eq!(kinds(&events), vec![STARTED]);
    assert!(state.in_flux().contains("a.txt"));

    // Scan 3: same timestamp again, the write has settled.
    let events = state.scan(&entries(&[("a.txt", 200)]), mode);
    assert_eq!(kinds(&events), vec![SETTLED]);
    assert!(!state.in_flux().contains("a.txt"));

    // Scan 4: b.txt appears.
    let events = state.scan(&entries(&[("a.txt", 200), ("b.txt", 300)]), mode);
    assert_eq!(kinds(&events), vec![DirectoryEventKind::Created]);
    assert_eq!(events[0].count, 1);
    assert_eq!(state.snapshot().get("b.txt"), Some(&300));
    assert_eq!(state.entry_count(), 2);

    // Scan 5: a.txt is gone. b.txt was new in scan 4 and settles here.
    let events = state.scan(&entries(&[("b.txt", 300)]), mode);
    assert_eq!(kinds(&events), vec![SETTLED, DirectoryEventKind::Deleted]);
    assert_eq!(events[0].entries, vec!["b.txt".to_string()]);
    assert_eq!(state.entry_count(), 1);
}

#[test]
fn test_isolated_edits_fire_exactly_twice_each() {
    let names = ["one", "two", "three"];
    let mut listing = entries(&[("one", 1), ("two", 1), ("three", 1)]);
    let mut state = ScanState::from_listing(&listing);
    let mut per_entry = std::collections::HashMap::<String, usize>::new();

    for (round, name) in names.iter().enumerate() {
        for entry in listing.iter_mut() {
            if entry.name.as_deref() == Some(*name) {
                entry.last_modified = 10 + round as i64;
            }
        }
        // The edit plus a few quiet scans.
        for _ in 0..4 {
            for event in state.scan(&listing, ChangeDetection::EntryCount) {
                assert!(event.is_changed());
                *per_entry.entry(event.entries[0].clone()).or_default() += 1;
            }
        }
    }

    for name in names {
        assert_eq!(per_entry[name], 2, "{} should fire started and settled", name);
    }
}

#[test]
fn test_failed_scans_do_not_touch_state() {
    let dir = InMemoryDirectory::with_entries("mem", entries(&[("a.txt", 1), ("b.txt", 2)]));
    let watcher = DirectoryWatcher::new(
        WatcherConfig::default().with_poll_interval(Duration::from_millis(10)),
    );
    watcher.watch(dir.clone());
    let before = (watcher.snapshot(), watcher.in_flux(), watcher.entry_count());

    for _ in 0..3 {
        dir.fail_next("storage unavailable");
    }
    assert!(wait_until(Duration::from_secs(2), || watcher.health().failed_scans >= 3));

    assert_eq!((watcher.snapshot(), watcher.in_flux(), watcher.entry_count()), before);
    let calls = dir.list_calls();
    assert!(wait_until(Duration::from_secs(2), || dir.list_calls() > calls));
    assert!(watcher.is_watching());
}

#[test]
fn test_exact_detection_over_watcher() {
    let dir = InMemoryDirectory::with_entries("mem", entries(&[("old.log", 1)]));
    let config = WatcherConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_detection(ChangeDetection::SetDifference);
    let watcher = DirectoryWatcher::new(config);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    watcher.register_callback_on_file_changed(move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    watcher.watch(dir.clone());

    dir.replace(entries(&[("new.log", 2)]));

    assert!(wait_until(Duration::from_secs(2), || events.lock().unwrap().len() >= 2));
    let events = events.lock().unwrap();
    assert_eq!(events[0].kind, DirectoryEventKind::Created);
    assert_eq!(events[0].entries, vec!["new.log".to_string()]);
    assert_eq!(events[1].kind, DirectoryEventKind::Deleted);
    assert_eq!(events[1].entries, vec!["old.log".to_string()]);
}

#[test]
fn test_watcher_instances_are_independent() {
    let left = InMemoryDirectory::with_entries("left", entries(&[("l", 1)]));
    let right = InMemoryDirectory::with_entries("right", entries(&[("r1", 1), ("r2", 1)]));
    let config = WatcherConfig::default().with_poll_interval(Duration::from_millis(10));

    let left_watcher = DirectoryWatcher::new(config.clone());
    let right_watcher = DirectoryWatcher::new(config);
    left_watcher.watch(left);
    right_watcher.watch(right);

    assert_eq!(left_watcher.entry_count(), 1);
    assert_eq!(right_watcher.entry_count(), 2);

    right_watcher.stop();
    assert!(left_watcher.is_watching());
    assert!(!right_watcher.is_watching());
}

#[test]
fn test_unnamed_entries_count_but_are_not_tracked() {
    let dir = InMemoryDirectory::with_entries("mem", entries(&[("a", 1)]));
    let watcher = DirectoryWatcher::new(
        WatcherConfig::default().with_poll_interval(Duration::from_millis(10)),
    );
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    watcher.register_callback_on_file_changed(move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    watcher.watch(dir.clone());

    dir.push_unnamed(5);

    assert!(wait_until(Duration::from_secs(2), || !events.lock().unwrap().is_empty()));
    assert_eq!(watcher.entry_count(), 2);
    assert_eq!(watcher.snapshot().len(), 1);
    let events = events.lock().unwrap();
    assert_eq!(kinds(&events), vec![DirectoryEventKind::Created]);
}
