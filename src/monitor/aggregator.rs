//! Per-scan aggregation of accepted filesystem events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::clock::Clock;

/// Repeated `Modify` events on the same folder inside this window are noise.
pub const NOISE_WINDOW: Duration = Duration::from_millis(500);

/// Kind of change reported by the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Create,
    Modify,
    Destroy,
    Rename,
}

/// One filesystem change, attributed to a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub target: String,
    /// Folder the change happened in (the folder itself for directory events)
    pub path: PathBuf,
    /// Empty for directory events
    pub file_name: String,
    pub is_directory: bool,
    pub effect: Effect,
}

/// A folder/file pair collected into a pending record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorPath {
    pub path: PathBuf,
    pub file_name: String,
    pub display_folder: String,
}

/// Changes for one scan that have not been sent to the media servers yet
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub target: String,
    pub last_event: Instant,
    /// Arrival order, no duplicates
    pub paths: Vec<MonitorPath>,
    pub destroy_seen: bool,
    pub last_path: PathBuf,
    sequence: u64,
}

impl PendingRecord {
    fn contains(&self, path: &Path, file_name: &str) -> bool {
        self.paths
            .iter()
            .any(|p| p.path == path && p.file_name == file_name)
    }

    /// Distinct folders in arrival order
    pub fn folders(&self) -> Vec<&Path> {
        let mut folders: Vec<&Path> = Vec::new();
        for entry in &self.paths {
            if !folders.contains(&entry.path.as_path()) {
                folders.push(&entry.path);
            }
        }
        folders
    }
}

/// What `add_event` did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// First event for the scan; a new record was started
    Created { display_folder: String },
    /// Existing record gained a new folder/file pair
    Extended { display_folder: String },
    /// Existing record refreshed, pair already known
    Refreshed,
    /// Rapid repeated write, dropped without touching the record
    Suppressed,
}

/// Result of one scheduler evaluation
#[derive(Debug)]
pub enum Selection {
    /// Nothing pending
    Empty,
    /// The global minimum interval has not elapsed since the last dispatch
    Throttled,
    /// The oldest record is still inside its quiet period
    Waiting { target: String, remaining: Duration },
    /// Record removed from the map; the caller owns its dispatch
    Ready(PendingRecord),
}

#[derive(Debug, Default)]
struct MonitorState {
    pending: HashMap<String, PendingRecord>,
    last_dispatch: Option<Instant>,
    next_sequence: u64,
}

/// Thread-safe map from scan name to its pending record.
///
/// Watch callbacks call [`Monitor::add_event`] from any thread; the scheduler
/// drains it through [`Monitor::take_ready`]. Both the map and the global
/// last-dispatch timestamp live behind one mutex.
pub struct Monitor {
    state: Mutex<MonitorState>,
    work_available: Notify,
    clock: Arc<dyn Clock>,
}

impl Monitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            work_available: Notify::new(),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        // No statement leaves the state half-updated, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fold an accepted event into the pending record for its scan.
    pub fn add_event(&self, event: ChangeEvent) -> AddOutcome {
        let now = self.clock.now();
        let ChangeEvent {
            target,
            path,
            file_name,
            effect,
            ..
        } = event;

        let outcome = {
            let mut state = self.lock();
            if let Some(record) = state.pending.get_mut(&target) {
                let elapsed = now.saturating_duration_since(record.last_event);
                if effect == Effect::Modify && elapsed < NOISE_WINDOW && path == record.last_path {
                    return AddOutcome::Suppressed;
                }

                record.last_event = now;
                record.last_path = path.clone();
                record.destroy_seen |= effect == Effect::Destroy;

                if record.contains(&path, &file_name) {
                    AddOutcome::Refreshed
                } else {
                    let display_folder = display_folder(&path);
                    record.paths.push(MonitorPath {
                        path,
                        file_name,
                        display_folder: display_folder.clone(),
                    });
                    AddOutcome::Extended { display_folder }
                }
            } else {
                let sequence = state.next_sequence;
                state.next_sequence += 1;
                let display_folder = display_folder(&path);
                state.pending.insert(
                    target.clone(),
                    PendingRecord {
                        target: target.clone(),
                        last_event: now,
                        paths: vec![MonitorPath {
                            path: path.clone(),
                            file_name,
                            display_folder: display_folder.clone(),
                        }],
                        destroy_seen: effect == Effect::Destroy,
                        last_path: path,
                        sequence,
                    },
                );
                AddOutcome::Created { display_folder }
            }
        };

        match &outcome {
            AddOutcome::Created { display_folder } => {
                log::info!("--> Scan moved to monitor={} folder={}", target, display_folder);
                self.work_available.notify_one();
            }
            AddOutcome::Extended { display_folder } => {
                log::info!("--> Scan added to monitor={} folder={}", target, display_folder);
            }
            AddOutcome::Refreshed => {
                log::trace!("Updated existing monitor {} updating time", target);
            }
            AddOutcome::Suppressed => {}
        }
        outcome
    }

    /// Pick the record with the oldest last event and remove it if both the
    /// global interval and its own quiet period have elapsed.
    ///
    /// Records sharing a timestamp are taken in creation order.
    pub fn take_ready(&self, quiet_period: Duration, global_interval: Duration) -> Selection {
        let now = self.clock.now();
        let mut state = self.lock();

        if state.pending.is_empty() {
            return Selection::Empty;
        }

        if let Some(last) = state.last_dispatch {
            if now.saturating_duration_since(last) < global_interval {
                return Selection::Throttled;
            }
        }

        let (target, last_event) = match state
            .pending
            .values()
            .min_by_key(|r| (r.last_event, r.sequence))
        {
            Some(oldest) => (oldest.target.clone(), oldest.last_event),
            None => return Selection::Empty,
        };

        let quiet_for = now.saturating_duration_since(last_event);
        if quiet_for < quiet_period {
            return Selection::Waiting {
                target,
                remaining: quiet_period - quiet_for,
            };
        }

        match state.pending.remove(&target) {
            Some(record) => {
                state.last_dispatch = Some(now);
                Selection::Ready(record)
            }
            None => Selection::Empty,
        }
    }

    /// Resolves after a new record is created. A wakeup sent while nobody
    /// waits is kept for the next waiter.
    pub fn work_available(&self) -> Notified<'_> {
        self.work_available.notified()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Copy of the pending record for a scan, if any
    pub fn pending(&self, target: &str) -> Option<PendingRecord> {
        self.lock().pending.get(target).cloned()
    }
}

/// Short label for a folder: "Show/Season 01" for season folders, otherwise
/// the last path segment.
pub fn display_folder(path: &Path) -> String {
    let Some(last) = path.file_name() else {
        return path.to_string_lossy().into_owned();
    };
    let last = last.to_string_lossy();

    if last.contains("Season") {
        if let Some(show) = path.parent().and_then(|p| p.file_name()) {
            return format!("{}/{}", show.to_string_lossy(), last);
        }
    }
    last.into_owned()
}
