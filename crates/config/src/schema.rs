use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    pub server: ServerSection,
    pub auth: AuthSection,
    pub dirs: DirsSection,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
    /// Where unauthenticated HTML requests are redirected.
    pub login_path: String,
    /// Request bodies larger than this are rejected with 413.
    pub max_body_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            login_path: "/login".into(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Cookie session settings.
///
/// `cookie_max_age` stays a string here; it is parsed (and rejected if it is
/// not a non-negative integer) when the authenticator is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub cookie_name: String,
    /// Secret the session cookies are signed with. Usually `${SWITCHYARD_COOKIE_SECRET}`.
    pub cookie_store_id: String,
    pub cookie_path: String,
    pub cookie_domain: String,
    pub cookie_max_age: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            cookie_name: "switchyard_session".into(),
            cookie_store_id: String::new(),
            cookie_path: "/".into(),
            cookie_domain: String::new(),
            cookie_max_age: "86400".into(),
        }
    }
}

/// Directories used by the version tracker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirsSection {
    /// Directory holding `version_track.csv`. Version tracking is disabled when unset.
    pub version_file_dir: Option<PathBuf>,
    /// Directory whose changes bump the application version.
    pub app_watch_notify: Option<PathBuf>,
}

impl DirsSection {
    /// `(version_file_dir, app_watch_notify)` when both are set. The watcher
    /// needs both.
    pub fn watch_pair(&self) -> Option<(&Path, &Path)> {
        Some((self.version_file_dir.as_deref()?, self.app_watch_notify.as_deref()?))
    }

    /// Only one of the two directories is set.
    pub fn is_partial(&self) -> bool {
        self.version_file_dir.is_some() != self.app_watch_notify.is_some()
    }
}
