use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

use {
    axum_extra::extract::cookie::{Cookie, CookieJar, SameSite},
    http::HeaderMap,
    switchyard_common::{
        OnPanic, PanicReport,
        panic::{deliver, panic_message, take_backtrace},
    },
    tracing::{debug, info},
};

use crate::{
    codec::{CookieCodec, CookiePayload},
    error::ConfigError,
    store::{Identity, MemorySessionStore, Session, SessionStore, now_secs},
};

/// Callback invoked with the identity whose sessions were invalidated.
pub type DeAuthListener = Arc<dyn Fn(&Identity) + Send + Sync>;

/// Raw cookie settings as they come from configuration.
#[derive(Debug, Clone, Default)]
pub struct CookieSettings {
    pub name: String,
    pub store_id: String,
    pub path: String,
    pub domain: String,
    /// Seconds, as text. `"0"` disables expiry.
    pub max_age: String,
}

/// Validates and issues session cookies, and owns the session store.
pub struct SessionAuthenticator {
    cookie_name: String,
    cookie_path: String,
    cookie_domain: String,
    max_age_secs: u64,
    codec: CookieCodec,
    store: Arc<dyn SessionStore>,
    listeners: RwLock<Arc<Vec<DeAuthListener>>>,
    on_panic: OnPanic,
}

impl SessionAuthenticator {
    /// Validate the settings and build an authenticator backed by an
    /// in-memory store.
    ///
    /// Configuring again yields a new authenticator; whichever one the
    /// caller keeps is in effect.
    pub fn configure(
        settings: CookieSettings,
        on_panic: Option<OnPanic>,
    ) -> Result<Self, ConfigError> {
        if settings.name.is_empty() {
            return Err(ConfigError::EmptyCookieName);
        }
        if settings.store_id.is_empty() {
            return Err(ConfigError::EmptyStoreId);
        }
        let max_age_secs = settings
            .max_age
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidMaxAge(settings.max_age.clone()))?;
        let on_panic = on_panic.ok_or(ConfigError::MissingPanicHandler)?;
        let codec =
            CookieCodec::new(settings.store_id.as_bytes()).ok_or(ConfigError::EmptyStoreId)?;

        let cookie_path = if settings.path.is_empty() {
            "/".to_string()
        } else {
            settings.path
        };

        Ok(Self {
            cookie_name: settings.name,
            cookie_path,
            cookie_domain: settings.domain,
            max_age_secs,
            codec,
            store: Arc::new(MemorySessionStore::new()),
            listeners: RwLock::new(Arc::new(Vec::new())),
            on_panic,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs
    }

    /// Identity behind the request's session cookie, if it is valid.
    ///
    /// Missing, malformed, forged, expired and revoked cookies all yield
    /// `None`. Nothing is written.
    pub fn validate_session(&self, headers: &HeaderMap) -> Option<Identity> {
        self.session_for(headers).map(|session| session.identity)
    }

    /// The live session behind the request's cookie.
    pub fn session_for(&self, headers: &HeaderMap) -> Option<Session> {
        let jar = CookieJar::from_headers(headers);
        let cookie = jar.get(&self.cookie_name)?;
        let payload = self.codec.open(cookie.value())?;

        let now = now_secs();
        if payload.exp.is_some_and(|exp| now >= exp) {
            return None;
        }

        let session = self.store.get(&payload.sid)?;
        if session.identity.as_str() != payload.sub || session.is_expired_at(now) {
            return None;
        }
        Some(session)
    }

    /// Whether `session_id` is still in the store and unexpired.
    pub fn is_session_live(&self, session_id: &str) -> bool {
        self.store
            .get(session_id)
            .is_some_and(|session| !session.is_expired_at(now_secs()))
    }

    /// Start a session for `identity`. The returned cookie must be sent back
    /// to the client (`Set-Cookie`).
    pub fn login(&self, identity: Identity) -> (Session, Cookie<'static>) {
        let issued_at = now_secs();
        let expires_at = (self.max_age_secs > 0).then(|| issued_at + self.max_age_secs);
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            identity,
            issued_at,
            expires_at,
        };
        let value = self.codec.seal(&CookiePayload {
            sid: session.id.clone(),
            sub: session.identity.as_str().to_string(),
            iat: issued_at,
            exp: expires_at,
        });
        self.store.insert(session.clone());
        debug!(identity = %session.identity, session_id = %session.id, "session created");

        let mut cookie = self.base_cookie(value);
        if self.max_age_secs > 0 {
            cookie.set_max_age(time::Duration::seconds(
                i64::try_from(self.max_age_secs).unwrap_or(i64::MAX),
            ));
        }
        (session, cookie)
    }

    /// A cookie that makes the client forget its session.
    pub fn logout_cookie(&self) -> Cookie<'static> {
        let mut cookie = self.base_cookie(String::new());
        cookie.set_max_age(time::Duration::ZERO);
        cookie
    }

    fn base_cookie(&self, value: String) -> Cookie<'static> {
        let mut cookie = Cookie::new(self.cookie_name.clone(), value);
        cookie.set_path(self.cookie_path.clone());
        cookie.set_http_only(true);
        cookie.set_same_site(SameSite::Lax);
        if !self.cookie_domain.is_empty() {
            cookie.set_domain(self.cookie_domain.clone());
        }
        cookie
    }

    /// Invalidate every session of `identity`, then notify all listeners.
    ///
    /// Listeners run synchronously on the caller's task. A panicking listener
    /// is reported through the panic callback and the rest still run.
    pub fn de_authenticate(&self, identity: &Identity) {
        let removed = self.store.remove_identity(identity);
        info!(identity = %identity, sessions = removed, "de-authenticated");

        let listeners = self.listener_snapshot();
        for listener in listeners.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(identity)));
            if let Err(payload) = outcome {
                deliver(&self.on_panic, &PanicReport {
                    message: panic_message(payload.as_ref()),
                    url: "de-auth".into(),
                    params: serde_json::json!({ "identity": identity.as_str() }).to_string(),
                    stack: take_backtrace(),
                });
            }
        }
    }

    /// Register a de-auth listener. The same listener added twice fires twice.
    pub fn add_deauth_listener(&self, listener: DeAuthListener) {
        let mut guard = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
    }

    pub fn listener_count(&self) -> usize {
        self.listener_snapshot().len()
    }

    fn listener_snapshot(&self) -> Arc<Vec<DeAuthListener>> {
        Arc::clone(&self.listeners.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Live sessions in the store.
    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    /// Drop expired sessions from the store.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(now_secs())
    }
}

/// Constant-time string comparison (prevents timing attacks).
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}
