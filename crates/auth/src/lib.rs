//! Cookie-session authentication.
//!
//! [`SessionAuthenticator`] owns every session: it issues signed cookies on
//! login, validates them on each authenticated request, and on
//! de-authentication drops the identity's sessions and fans the event out to
//! registered listeners (the gateway uses this to close live WebSockets).

pub mod authenticator;
pub mod codec;
pub mod error;
pub mod store;

pub use {
    authenticator::{CookieSettings, DeAuthListener, SessionAuthenticator, constant_time_eq},
    error::ConfigError,
    store::{Identity, MemorySessionStore, Session, SessionStore},
};
