//! Polling directory watcher with per-path debounce
//!
//! Every poll takes a fingerprint (modification time and size) of each
//! description file. A path is reported only after its fingerprint stayed
//! the same for the debounce window, so half-written files are never read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

use super::loader::DocumentFormat;

/// Watcher timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherSettings {
    /// Directory scan interval
    pub poll_interval: Duration,
    /// Quiet time a path needs before it is reported
    pub debounce: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            debounce: Duration::from_millis(500),
        }
    }
}

/// Debounced change of one description file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Created or modified
    Changed(PathBuf),
    /// Deleted
    Removed(PathBuf),
}

impl WatchEvent {
    /// Affected path
    pub fn path(&self) -> &Path {
        match self {
            Self::Changed(path) | Self::Removed(path) => path,
        }
    }
}

/// What a scan saw of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// Last modification time, when the platform reports one
    pub modified: Option<SystemTime>,
    /// Size in bytes
    pub len: u64,
}

#[derive(Debug)]
struct Pending {
    seen: Option<Fingerprint>,
    since: Instant,
}

/// Directory watcher state
#[derive(Debug)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    settings: WatcherSettings,
    known: HashMap<PathBuf, Fingerprint>,
    pending: HashMap<PathBuf, Pending>,
}

impl DirectoryWatcher {
    /// Watch `dir`; files already present are reported as changes
    pub fn new(dir: impl Into<PathBuf>, settings: WatcherSettings) -> Self {
        Self {
            dir: dir.into(),
            settings,
            known: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Scan the directory once and return the events whose debounce elapsed
    pub async fn poll(&mut self) -> std::io::Result<Vec<WatchEvent>> {
        let current = scan(&self.dir).await?;
        Ok(self.observe(&current, Instant::now()))
    }

    /// Feed one scan result
    pub fn observe(&mut self, current: &HashMap<PathBuf, Fingerprint>, now: Instant) -> Vec<WatchEvent> {
        let mut paths: Vec<&PathBuf> = current.keys().chain(self.known.keys()).collect();
        paths.sort();
        paths.dedup();

        let mut changed = Vec::new();
        for path in paths {
            let seen = current.get(path).copied();
            let settled = self.known.get(path).copied();

            if seen == settled {
                self.pending.remove(path);
                continue;
            }

            match self.pending.get_mut(path) {
                Some(pending) if pending.seen == seen => {}
                Some(pending) => {
                    pending.seen = seen;
                    pending.since = now;
                }
                None => {
                    self.pending.insert(path.clone(), Pending { seen, since: now });
                }
            }
            changed.push(path.clone());
        }

        let mut events = Vec::new();
        for path in changed {
            let Some(pending) = self.pending.get(&path) else {
                continue;
            };
            if now.duration_since(pending.since) < self.settings.debounce {
                continue;
            }
            match pending.seen {
                Some(fingerprint) => {
                    self.known.insert(path.clone(), fingerprint);
                    events.push(WatchEvent::Changed(path.clone()));
                }
                None => {
                    self.known.remove(&path);
                    events.push(WatchEvent::Removed(path.clone()));
                }
            }
            self.pending.remove(&path);
        }
        events
    }
}

/// Fingerprints of the loadable files directly inside `dir`
pub async fn scan(dir: &Path) -> std::io::Result<HashMap<PathBuf, Fingerprint>> {
    let mut found = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden || DocumentFormat::from_path(&path).is_none() {
            continue;
        }
        // Vanished between listing and stat: treat as absent
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if meta.is_file() {
            found.insert(
                path,
                Fingerprint {
                    modified: meta.modified().ok(),
                    len: meta.len(),
                },
            );
        }
    }
    Ok(found)
}
