use thiserror::Error;

/// Invalid or missing startup parameters. Fatal: the server does not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("auth cannot be configured with empty cookie session name")]
    EmptyCookieName,
    #[error("auth cannot be configured with empty cookie store id")]
    EmptyStoreId,
    #[error("auth cannot be configured with cookie max-age not integer: {0:?}")]
    InvalidMaxAge(String),
    #[error("OnPanic handler must be provided")]
    MissingPanicHandler,
}
