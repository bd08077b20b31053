//! Watcher subscriptions: one notify watcher per scan folder, each feeding
//! the filter and monitor directly from notify's callback thread.

use std::path::Path;
use std::sync::Arc;

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::Config;
use crate::error::Result;
use crate::monitor::{ChangeEvent, Effect, EventFilter, Monitor};

/// Live subscriptions. Dropping this stops every watch.
pub struct ScanWatchers {
    watchers: Vec<RecommendedWatcher>,
}

impl ScanWatchers {
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}

fn effect_of(kind: &EventKind) -> Option<Effect> {
    match kind {
        EventKind::Create(_) => Some(Effect::Create),
        EventKind::Modify(ModifyKind::Name(_)) => Some(Effect::Rename),
        EventKind::Modify(_) => Some(Effect::Modify),
        EventKind::Remove(_) => Some(Effect::Destroy),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Split a notify event into per-path changes for `target`.
pub fn to_change_events(target: &str, event: &notify::Event) -> Vec<ChangeEvent> {
    let Some(effect) = effect_of(&event.kind) else {
        return Vec::new();
    };

    event
        .paths
        .iter()
        .filter_map(|path| {
            let is_directory = match event.kind {
                EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => true,
                EventKind::Remove(_) => false,
                _ => path.is_dir(),
            };

            if is_directory {
                Some(ChangeEvent {
                    target: target.to_string(),
                    path: path.clone(),
                    file_name: String::new(),
                    is_directory,
                    effect,
                })
            } else {
                let parent = path.parent()?;
                Some(ChangeEvent {
                    target: target.to_string(),
                    path: parent.to_path_buf(),
                    file_name: path.file_name()?.to_string_lossy().into_owned(),
                    is_directory,
                    effect,
                })
            }
        })
        .collect()
}

fn watch_path(
    target: &str,
    root: &Path,
    filter: Arc<EventFilter>,
    monitor: Arc<Monitor>,
) -> Result<RecommendedWatcher> {
    let scan_name = target.to_string();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                for change in to_change_events(&scan_name, &event) {
                    log::trace!(
                        "effect={:?} dir={} path={} file={}",
                        change.effect,
                        change.is_directory,
                        change.path.display(),
                        change.file_name
                    );
                    if filter.accepts(&change) {
                        monitor.add_event(change);
                    }
                }
            }
            Err(e) => log::warn!("watch error for monitor={}: {}", scan_name, e),
        }
    })?;

    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Subscribe to every existing folder of every scan. Missing folders are
/// logged and skipped.
pub fn watch_scans(
    config: &Config,
    filter: Arc<EventFilter>,
    monitor: Arc<Monitor>,
) -> Result<ScanWatchers> {
    let mut watchers = Vec::new();

    for scan in &config.remote_scan.scans {
        for path in &scan.paths {
            if !path.exists() {
                log::warn!(
                    "Watch path for {} does not exist, skipping path={}",
                    scan.name,
                    path.display()
                );
                continue;
            }

            watchers.push(watch_path(&scan.name, path, filter.clone(), monitor.clone())?);
            log::trace!("Started watch for {} on path {}", scan.name, path.display());
        }
    }

    Ok(ScanWatchers { watchers })
}
