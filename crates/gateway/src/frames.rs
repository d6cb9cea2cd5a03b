//! JSON envelopes for XHR responses and WebSocket frames.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

pub mod error_codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";
    pub const INTERNAL: &str = "INTERNAL";
    pub const INVALID_FRAME: &str = "INVALID_FRAME";
    pub const UNKNOWN_PROC: &str = "UNKNOWN_PROC";
}

/// Error payload shared by XHR responses and WS replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn internal() -> Self {
        Self::new(error_codes::INTERNAL, "internal server error")
    }

    /// HTTP status used when this error ends an XHR request.
    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            error_codes::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
            error_codes::NOT_FOUND => StatusCode::NOT_FOUND,
            error_codes::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            error_codes::INTERNAL => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// `{"ok":true,"payload":...}`
pub fn xhr_ok(payload: Value) -> Response {
    Json(serde_json::json!({ "ok": true, "payload": payload })).into_response()
}

/// `{"ok":false,"error":{...}}` with the status matching the error code.
pub fn xhr_error(error: ErrorShape) -> Response {
    let status = error.status();
    (status, Json(serde_json::json!({ "ok": false, "error": error }))).into_response()
}

/// A procedure call sent by a WebSocket client.
#[derive(Debug, Clone, Deserialize)]
pub struct CallFrame {
    pub id: String,
    pub proc: String,
    #[serde(default)]
    pub params: Value,
}

/// Frames pushed by the server over a WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Hello {
        #[serde(rename = "connId")]
        conn_id: String,
        version: String,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
    },
    Version {
        version: String,
    },
    Deauth,
}

impl ServerFrame {
    pub fn ok(id: String, payload: Value) -> Self {
        Self::Res {
            id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: String, error: ErrorShape) -> Self {
        Self::Res {
            id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
