use {notify_debouncer_full::notify, switchyard_auth::ConfigError, thiserror::Error};

use crate::routes::{AuthClass, TransportKind};

/// Route registration failures. All of them abort startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("{kind} {class} route {pattern:?} is already registered")]
    Duplicate {
        pattern: String,
        kind: TransportKind,
        class: AuthClass,
    },
    #[error("handler {handler:?} is a {endpoint} endpoint and cannot serve {kind} route {pattern:?}")]
    EndpointMismatch {
        pattern: String,
        kind: TransportKind,
        handler: String,
        endpoint: &'static str,
    },
    #[error("FILE route {pattern:?} must be public")]
    FilePublicOnly { pattern: String },
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },
}

/// No route matched and no fallback applies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no {kind} route matches {path:?}")]
    NotFound { kind: TransportKind, path: String },
}

/// Version tracker startup failures.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("version tracking file: {0}")]
    Io(#[from] std::io::Error),
    #[error("file watcher: {0}")]
    Watch(#[from] notify::Error),
}

/// Anything that prevents the gateway from starting.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Version(#[from] VersionError),
}
