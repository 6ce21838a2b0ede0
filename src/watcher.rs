//! Change detection for the files a program was built from.
//!
//! A [`ChangeSource`] only ever reports a file once its content has settled
//! (two reads agree) and its digest differs from the one the live pipeline
//! was built with. How it decides which files to look at is its own business:
//! [`PollingChangeSource`] checks everything on a fixed interval,
//! [`NotifyChangeSource`] only checks files the OS reported as touched.

use crate::source::{Digest, SourceRegistry};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A file the live program depends on, with the digest it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub digest: Digest,
}

/// A tracked file whose settled content no longer matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: PathBuf,
    /// Digest of the new content.
    pub digest: Digest,
}

pub trait ChangeSource: Send + Sync {
    /// Returns the tracked files that changed. An empty result means the
    /// program is clean; unreadable files count as unchanged.
    fn poll(&mut self, tracked: &[TrackedFile], registry: &SourceRegistry) -> Vec<Change>;
}

/// Stable-reads `file` and reports it if its digest moved.
fn confirm(file: &TrackedFile, registry: &SourceRegistry) -> Option<Change> {
    match registry.reread_stable(&file.path) {
        Ok(bytes) => {
            let digest = Digest::of(&bytes);
            (digest != file.digest).then(|| Change {
                path: file.path.clone(),
                digest,
            })
        }
        Err(e) => {
            tracing::debug!(path = %file.path.display(), "treating unreadable file as unchanged: {e}");
            None
        }
    }
}

/// Checks every tracked file at most once per interval.
pub struct PollingChangeSource {
    interval: Duration,
    last_poll: Option<Instant>,
}

impl PollingChangeSource {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_poll: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PollingChangeSource {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::DEFAULT_POLL_INTERVAL_MS))
    }
}

impl ChangeSource for PollingChangeSource {
    fn poll(&mut self, tracked: &[TrackedFile], registry: &SourceRegistry) -> Vec<Change> {
        let now = Instant::now();
        if let Some(last) = self.last_poll {
            if now.duration_since(last) < self.interval {
                return Vec::new();
            }
        }
        self.last_poll = Some(now);

        tracked
            .iter()
            .filter_map(|file| confirm(file, registry))
            .collect()
    }
}

/// Event-driven change source backed by `notify`.
///
/// Parent directories are watched rather than the files themselves, because
/// editors that save atomically (write a temp file, then rename) replace the
/// inode a direct watch would be attached to. Events are matched by file
/// name and only mark a file as a candidate; it still has to pass the same
/// stable-read and digest check as the polling source.
pub struct NotifyChangeSource {
    watcher: Mutex<RecommendedWatcher>,
    watched_dirs: HashSet<PathBuf>,
    pending: Arc<Mutex<HashSet<OsString>>>,
}

impl NotifyChangeSource {
    pub fn new() -> notify::Result<Self> {
        let pending: Arc<Mutex<HashSet<OsString>>> = Arc::default();
        let sink = Arc::clone(&pending);

        let watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    let mut pending = sink.lock();
                    for path in &event.paths {
                        if let Some(name) = path.file_name() {
                            pending.insert(name.to_os_string());
                        }
                    }
                }
                Err(e) => tracing::warn!("file watcher error: {e}"),
            },
            Config::default(),
        )?;

        Ok(Self {
            watcher: Mutex::new(watcher),
            watched_dirs: HashSet::new(),
            pending,
        })
    }

    fn watch_parents(&mut self, tracked: &[TrackedFile]) {
        for file in tracked {
            let Some(dir) = file.path.parent().map(Path::to_path_buf) else {
                continue;
            };
            if self.watched_dirs.contains(&dir) {
                continue;
            }
            match self.watcher.lock().watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    tracing::info!(dir = %dir.display(), "watching shader directory");
                    // Anything written before the watch existed would be missed.
                    if let Some(name) = file.path.file_name() {
                        self.pending.lock().insert(name.to_os_string());
                    }
                    self.watched_dirs.insert(dir);
                }
                Err(e) => tracing::warn!(dir = %dir.display(), "failed to watch directory: {e}"),
            }
        }
    }
}

impl ChangeSource for NotifyChangeSource {
    fn poll(&mut self, tracked: &[TrackedFile], registry: &SourceRegistry) -> Vec<Change> {
        self.watch_parents(tracked);

        let touched = std::mem::take(&mut *self.pending.lock());
        if touched.is_empty() {
            return Vec::new();
        }

        let mut changes = Vec::new();
        for file in tracked {
            let Some(name) = file.path.file_name() else {
                continue;
            };
            if !touched.contains(name) {
                continue;
            }
            match registry.reread_stable(&file.path) {
                Ok(bytes) => {
                    let digest = Digest::of(&bytes);
                    if digest != file.digest {
                        changes.push(Change {
                            path: file.path.clone(),
                            digest,
                        });
                    }
                }
                Err(e) => {
                    // Still being written; look again on the next poll.
                    tracing::debug!(path = %file.path.display(), "deferring unreadable file: {e}");
                    self.pending.lock().insert(name.to_os_string());
                }
            }
        }
        changes
    }
}
