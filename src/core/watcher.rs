use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crate::config::WatcherConfig;
use super::events::DirectoryEvent;
use super::provider::DirectoryProvider;
use super::scan::ScanState;

/// Observer invoked synchronously from the scan thread for every event.
pub type ChangeCallback = Arc<dyn Fn(&DirectoryEvent) + Send + Sync>;

/// Scan outcomes of the current session, so callers can tell a quiet
/// directory from a watcher that fails every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanHealth {
    pub scans: u64,
    pub failed_scans: u64,
    pub consecutive_failures: u32,
    pub callback_failures: u64,
    pub last_error: Option<String>,
}

impl ScanHealth {
    pub fn is_failing(&self) -> bool {
        self.consecutive_failures > 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct SessionState {
    scan: Mutex<ScanState>,
    health: Mutex<ScanHealth>,
    /// Set when the initial listing failed; the next good listing becomes
    /// the baseline instead of being diffed.
    baseline_pending: AtomicBool,
    cancelled: AtomicBool,
}

thread_local! {
    /// Session driven by the current thread, if it is a scan worker.
    static WORKER_SESSION: RefCell<Option<Arc<SessionState>>> = RefCell::new(None);
}

fn current_worker_cancelled() -> bool {
    WORKER_SESSION.with(|session| {
        session
            .borrow()
            .as_ref()
            .is_some_and(|state| state.cancelled.load(Ordering::SeqCst))
    })
}

impl SessionState {
    fn record_failure(&self, error: &anyhow::Error) -> u32 {
        let mut health = lock(&self.health);
        health.failed_scans += 1;
        health.consecutive_failures += 1;
        health.last_error = Some(format!("{:#}", error));
        health.consecutive_failures
    }

    fn with_scan<R>(&self, read: impl FnOnce(&ScanState) -> R) -> R {
        let scan = lock(&self.scan);
        read(&scan)
    }

    fn health(&self) -> ScanHealth {
        lock(&self.health).clone()
    }

    fn record_scan(&self) -> u32 {
        let mut health = lock(&self.health);
        health.scans += 1;
        std::mem::take(&mut health.consecutive_failures)
    }
}

/// Closing the paired sender raises the signal, including while the
/// worker sleeps between polls.
struct StopSignal(Receiver<()>);

impl StopSignal {
    fn is_raised(&self) -> bool {
        !matches!(self.0.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleeps for `interval`; returns true if stopped in the meantime.
    fn wait(&self, interval: Duration) -> bool {
        !matches!(self.0.recv_timeout(interval), Err(RecvTimeoutError::Timeout))
    }
}

struct WatchSession {
    label: String,
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
    state: Arc<SessionState>,
}

impl WatchSession {
    fn shutdown(self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        drop(self.stop_tx);
        // A callback that restarts or stops the watcher runs on the worker itself.
        if self.handle.thread().id() != thread::current().id() && self.handle.join().is_err() {
            tracing::error!("Scan thread for {} terminated abnormally", self.label);
        }
        lock(&self.state.scan).clear();
        tracing::info!("Stopped watching {}", self.label);
    }
}

/// Polling watcher for a single flat directory.
///
/// Each poll lists the directory, diffs it against the last snapshot and
/// reports created, deleted and changed entries to one registered callback.
/// A modified entry is reported twice: once when its timestamp first moves
/// and once when it holds still for a whole poll interval.
pub struct DirectoryWatcher {
    config: WatcherConfig,
    callback: Arc<RwLock<Option<ChangeCallback>>>,
    session: Mutex<Option<WatchSession>>,
    /// Serializes session replacement.
    start_lock: Mutex<()>,
}

impl Default for DirectoryWatcher {
    fn default() -> Self {
        Self::new(WatcherConfig::default())
    }
}

impl DirectoryWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            callback: Arc::new(RwLock::new(None)),
            session: Mutex::new(None),
            start_lock: Mutex::new(()),
        }
    }

    /// Takes the start lock. A scan worker whose session is already being
    /// replaced gives up instead, since the thread holding the lock is
    /// waiting for it to exit.
    fn acquire_start_lock(&self) -> Option<MutexGuard<'_, ()>> {
        loop {
            match self.start_lock.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if current_worker_cancelled() {
                        return None;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Replaces any active session with one watching `directory`.
    ///
    /// `None` is ignored and leaves an active session running. The previous
    /// session is fully stopped before the new baseline is listed, so none of
    /// its events are delivered afterwards.
    pub fn start_watching_directory(&self, directory: Option<Arc<dyn DirectoryProvider>>) {
        let Some(directory) = directory else {
            tracing::debug!("No directory given, keeping current session");
            return;
        };

        let Some(_start_guard) = self.acquire_start_lock() else {
            tracing::debug!("Ignoring restart from a scan thread that is being stopped");
            return;
        };

        self.stop();

        let label = directory.describe();
        let state = Arc::new(SessionState::default());
        match directory.list() {
            Ok(listing) => {
                *lock(&state.scan) = ScanState::from_listing(&listing);
                tracing::info!(
                    "Watching {} ({} entries, polling every {:?}, {} detection)",
                    label,
                    listing.len(),
                    self.config.poll_interval(),
                    self.config.detection
                );
            }
            Err(err) => {
                state.record_failure(&err);
                state.baseline_pending.store(true, Ordering::SeqCst);
                tracing::warn!(
                    "Initial listing of {} failed, baseline deferred to the next scan: {:#}",
                    label,
                    err
                );
            }
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let worker = ScanWorker {
            directory,
            config: self.config.clone(),
            callback: Arc::clone(&self.callback),
            state: Arc::clone(&state),
            stop: StopSignal(stop_rx),
        };

        let spawned = thread::Builder::new()
            .name("pollwatch-scan".to_string())
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                let replaced = lock(&self.session).replace(WatchSession {
                    label,
                    stop_tx,
                    handle,
                    state,
                });
                debug_assert!(replaced.is_none());
                if let Some(previous) = replaced {
                    previous.shutdown();
                }
            }
            Err(err) => tracing::error!("Failed to spawn scan thread for {}: {}", label, err),
        }
    }

    /// Convenience for `start_watching_directory(Some(..))`.
    pub fn watch<D: DirectoryProvider + 'static>(&self, directory: D) {
        self.start_watching_directory(Some(Arc::new(directory)));
    }

    /// Sets the single observer, replacing the previous one. Running
    /// sessions pick it up from their next event.
    pub fn register_callback_on_file_changed<F>(&self, callback: F)
    where
        F: Fn(&DirectoryEvent) + Send + Sync + 'static,
    {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Stops the active session. No callback runs after this returns,
    /// unless it is called from inside the callback itself.
    pub fn stop(&self) {
        let session = lock(&self.session).take();
        if let Some(session) = session {
            session.shutdown();
        }
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.session).is_some()
    }

    fn session_state(&self) -> Option<Arc<SessionState>> {
        lock(&self.session).as_ref().map(|session| Arc::clone(&session.state))
    }

    /// Last recorded timestamp per entry name.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.session_state()
            .map(|state| state.with_scan(|scan| scan.snapshot().clone()))
            .unwrap_or_default()
    }

    /// Entries whose timestamp moved and has not settled yet.
    pub fn in_flux(&self) -> BTreeSet<String> {
        self.session_state()
            .map(|state| state.with_scan(|scan| scan.in_flux().clone()))
            .unwrap_or_default()
    }

    pub fn entry_count(&self) -> usize {
        self.session_state()
            .map(|state| state.with_scan(ScanState::entry_count))
            .unwrap_or(0)
    }

    pub fn health(&self) -> ScanHealth {
        self.session_state()
            .map(|state| state.health())
            .unwrap_or_default()
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ScanWorker {
    directory: Arc<dyn DirectoryProvider>,
    config: WatcherConfig,
    callback: Arc<RwLock<Option<ChangeCallback>>>,
    state: Arc<SessionState>,
    stop: StopSignal,
}

impl ScanWorker {
    fn run(self) {
        let label = self.directory.describe();
        tracing::debug!("Scan loop started for {}", label);
        WORKER_SESSION.with(|session| *session.borrow_mut() = Some(Arc::clone(&self.state)));

        while !self.stop.is_raised() {
            self.scan_once(&label);
            if self.stop.wait(self.config.poll_interval()) {
                break;
            }
        }

        tracing::debug!("Scan loop for {} exited", label);
    }

    fn scan_once(&self, label: &str) {
        let listing = match self.directory.list() {
            Ok(listing) => listing,
            Err(err) => {
                let failures = self.state.record_failure(&err);
                tracing::warn!("Error while watching {}: {:#}", label, err);
                if failures == self.config.failure_alert_threshold {
                    tracing::error!("{} consecutive scans of {} failed", failures, label);
                }
                return;
            }
        };

        if self.state.baseline_pending.swap(false, Ordering::SeqCst) {
            *lock(&self.state.scan) = ScanState::from_listing(&listing);
            self.state.record_scan();
            tracing::info!("Baseline for {} taken ({} entries)", label, listing.len());
            return;
        }

        let events = lock(&self.state.scan).scan(&listing, self.config.detection);
        let recovered_after = self.state.record_scan();
        if recovered_after > 0 {
            tracing::info!("Scanning {} recovered after {} failed attempts", label, recovered_after);
        }

        for event in &events {
            if self.stop.is_raised() {
                return;
            }
            self.emit(event);
        }
    }

    fn emit(&self, event: &DirectoryEvent) {
        tracing::debug!(
            kind = event.label(),
            entries = ?event.entries,
            count = event.count,
            "Directory event"
        );

        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(callback) = callback else {
            return;
        };

        if panic::catch_unwind(AssertUnwindSafe(|| (callback.as_ref())(event))).is_err() {
            lock(&self.state.health).callback_failures += 1;
            tracing::error!("Change callback panicked while handling {} event", event.label());
        }
    }
}
