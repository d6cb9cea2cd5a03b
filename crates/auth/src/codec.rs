//! Signed session cookie values.
//!
//! Format: `base64url(json payload) "." base64url(HMAC-SHA256(store id, payload))`.

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    hmac::{Hmac, Mac},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried inside the cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookiePayload {
    /// Session id.
    pub sid: String,
    /// Identity.
    pub sub: String,
    pub iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Seals and opens cookie values with a keyed MAC.
///
/// Cloning the prepared MAC per call keeps `open` free of shared mutable state.
#[derive(Clone)]
pub struct CookieCodec {
    mac: HmacSha256,
}

impl CookieCodec {
    /// HMAC accepts keys of any length, so this only fails for an empty key.
    pub fn new(key: &[u8]) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        HmacSha256::new_from_slice(key)
            .ok()
            .map(|mac| Self { mac })
    }

    pub fn seal(&self, payload: &CookiePayload) -> String {
        // Serializing a struct of strings and integers cannot fail.
        let json = serde_json::to_vec(payload).unwrap_or_default();
        let body = URL_SAFE_NO_PAD.encode(&json);
        let mut mac = self.mac.clone();
        mac.update(body.as_bytes());
        let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{body}.{tag}")
    }

    /// Returns `None` for anything that is not a value sealed with this key.
    pub fn open(&self, value: &str) -> Option<CookiePayload> {
        let (body, tag) = value.split_once('.')?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
        let mut mac = self.mac.clone();
        mac.update(body.as_bytes());
        mac.verify_slice(&tag).ok()?;
        let json = URL_SAFE_NO_PAD.decode(body).ok()?;
        serde_json::from_slice(&json).ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn payload() -> CookiePayload {
        CookiePayload {
            sid: "sid-1".into(),
            sub: "alice".into(),
            iat: 10,
            exp: Some(3610),
        }
    }

    #[test]
    fn opens_what_it_sealed() {
        let codec = CookieCodec::new(b"abc123").unwrap();
        let sealed = codec.seal(&payload());
        assert_eq!(codec.open(&sealed), Some(payload()));
    }

    #[test]
    fn other_key_is_rejected() {
        let sealed = CookieCodec::new(b"abc123").unwrap().seal(&payload());
        assert!(CookieCodec::new(b"other").unwrap().open(&sealed).is_none());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let codec = CookieCodec::new(b"abc123").unwrap();
        let sealed = codec.seal(&payload());
        let (_, tag) = sealed.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sid":"sid-1","sub":"mallory","iat":10}"#);
        assert!(codec.open(&format!("{forged}.{tag}")).is_none());
    }

    #[test]
    fn garbage_is_rejected_without_panicking() {
        let codec = CookieCodec::new(b"abc123").unwrap();
        for value in ["", ".", "no-dot", "!!!.???", "a.b.c"] {
            assert!(codec.open(value).is_none(), "{value:?} should not open");
        }
    }

    #[test]
    fn empty_key_is_refused() {
        assert!(CookieCodec::new(b"").is_none());
    }
}
