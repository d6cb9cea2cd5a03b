//! Application version tracking.
//!
//! The version is a counter persisted as CSV lines `<version>,<rfc3339>`;
//! the last line is current. A file watcher on the application directory
//! bumps it after every debounced batch of changes so connected clients can
//! notice a redeploy.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    notify_debouncer_full::{
        DebounceEventResult, Debouncer, RecommendedCache, new_debouncer,
        notify::{EventKind, RecommendedWatcher, RecursiveMode},
    },
    tokio::sync::watch,
    tracing::{debug, info, warn},
};

use crate::error::VersionError;

/// Called with the new version after every bump.
pub type OnVersionChange = Arc<dyn Fn(&str) + Send + Sync>;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

struct Shared {
    tx: watch::Sender<Arc<str>>,
    counter: Mutex<u64>,
    tracking_file: Option<PathBuf>,
    on_change: Option<OnVersionChange>,
}

impl Shared {
    fn bump(&self) {
        let next = {
            let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
            *counter += 1;
            *counter
        };
        if let Some(path) = &self.tracking_file
            && let Err(e) = append_line(path, next)
        {
            warn!(path = %path.display(), error = %e, "failed to append version line");
        }
        let text: Arc<str> = Arc::from(next.to_string());
        self.tx.send_replace(Arc::clone(&text));
        info!(version = %text, "application version changed");
        if let Some(cb) = &self.on_change {
            cb(&text);
        }
    }
}

fn append_line(path: &Path, version: u64) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{version},{}", chrono::Utc::now().to_rfc3339())
}

/// Last parseable version in the tracking file content.
fn parse_tracking(content: &str) -> Option<u64> {
    content
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .find_map(|l| l.split(',').next()?.trim().parse().ok())
}

/// Read the tracking file, creating it at version 1 when missing.
fn load_or_create(path: &Path) -> io::Result<u64> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_tracking(&content).unwrap_or_else(|| {
            warn!(path = %path.display(), "version tracking file has no valid line, using 1");
            1
        })),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            append_line(path, 1)?;
            Ok(1)
        },
        Err(e) => Err(e),
    }
}

pub struct VersionTracker {
    shared: Arc<Shared>,
    watcher: Mutex<Option<Debouncer<RecommendedWatcher, RecommendedCache>>>,
}

impl VersionTracker {
    /// Load the tracking file and start watching `notify_target`.
    pub fn start(
        tracking_file: impl AsRef<Path>,
        notify_target: impl AsRef<Path>,
        on_change: Option<OnVersionChange>,
    ) -> Result<Self, VersionError> {
        Self::start_with_debounce(tracking_file, notify_target, on_change, DEFAULT_DEBOUNCE)
    }

    pub fn start_with_debounce(
        tracking_file: impl AsRef<Path>,
        notify_target: impl AsRef<Path>,
        on_change: Option<OnVersionChange>,
        debounce: Duration,
    ) -> Result<Self, VersionError> {
        let tracking_file = tracking_file.as_ref();
        let initial = load_or_create(tracking_file)?;
        let tracking_file = fs::canonicalize(tracking_file)?;
        let target = fs::canonicalize(notify_target.as_ref())?;

        let (tx, _) = watch::channel(Arc::from(initial.to_string()));
        let shared = Arc::new(Shared {
            tx,
            counter: Mutex::new(initial),
            tracking_file: Some(tracking_file.clone()),
            on_change,
        });

        let sink = Arc::clone(&shared);
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let relevant = events.iter().any(|event| {
                        matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) && event.paths.iter().any(|p| p != &tracking_file)
                    });
                    if relevant {
                        sink.bump();
                    } else {
                        debug!(count = events.len(), "ignoring watcher batch");
                    }
                },
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "version watcher error");
                    }
                },
            }
        })?;
        debouncer.watch(&target, RecursiveMode::Recursive)?;
        info!(dir = %target.display(), version = initial, "version watcher started");

        Ok(Self {
            shared,
            watcher: Mutex::new(Some(debouncer)),
        })
    }

    /// A constant version with no watcher behind it.
    pub fn fixed(text: impl Into<String>) -> Self {
        let text: String = text.into();
        let counter = text.parse().unwrap_or(0);
        let (tx, _) = watch::channel(Arc::from(text));
        Self {
            shared: Arc::new(Shared {
                tx,
                counter: Mutex::new(counter),
                tracking_file: None,
                on_change: None,
            }),
            watcher: Mutex::new(None),
        }
    }

    pub fn current_version(&self) -> String {
        self.snapshot().to_string()
    }

    pub fn snapshot(&self) -> Arc<str> {
        Arc::clone(&self.shared.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<str>> {
        self.shared.tx.subscribe()
    }

    /// Bump the version as if the watcher had fired.
    pub fn bump(&self) {
        self.shared.bump();
    }

    pub fn is_running(&self) -> bool {
        self.watcher
            .lock()
            .map(|w| w.is_some())
            .unwrap_or_else(|e| e.into_inner().is_some())
    }

    /// Stop watching. Safe to call more than once.
    pub fn stop(&self) {
        let debouncer = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(debouncer) = debouncer {
            debouncer.stop();
            info!("version watcher stopped");
        }
    }
}

impl Drop for VersionTracker {
    fn drop(&mut self) {
        self.stop();
    }
}
