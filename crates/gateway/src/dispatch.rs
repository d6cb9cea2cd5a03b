//! Per-request pipeline: match, auth gate, guarded execution, respond.

use std::{collections::HashMap, sync::Arc};

use {
    axum::{
        Router,
        body::{Body, Bytes},
        extract::{FromRequestParts, Request, State, WebSocketUpgrade},
        http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header, request::Parts},
        response::{IntoResponse, Redirect, Response},
    },
    switchyard_auth::{Identity, SessionAuthenticator},
    tower_http::{sensitive_headers::SetSensitiveRequestHeadersLayer, trace::TraceLayer},
    tracing::{debug, warn},
};

use crate::{
    frames::{ErrorShape, error_codes, xhr_error, xhr_ok},
    guard::{Guarded, PanicGuard, RequestInfo, html_error_page},
    handler::{Endpoint, RequestContext},
    routes::{AuthClass, RouteMatch, RouteTable, TransportKind},
    version::VersionTracker,
    ws::{WsShared, WsSession, run_connection},
};

/// Response header carrying the application version.
pub const VERSION_HEADER: HeaderName = HeaderName::from_static("x-app-version");

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub login_path: String,
    pub max_body_bytes: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            login_path: "/login".into(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

pub struct Dispatcher {
    pub routes: Arc<RouteTable>,
    pub auth: Arc<SessionAuthenticator>,
    pub guard: PanicGuard,
    pub version: Arc<VersionTracker>,
    pub ws: Arc<WsShared>,
    pub settings: DispatchSettings,
}

/// True when the request asks for a WebSocket upgrade.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// `<login_path>?next=<url-encoded target>`
pub fn login_redirect_target(login_path: &str, next: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
    format!("{login_path}?next={encoded}")
}

fn parse_query(parts: &Parts) -> HashMap<String, String> {
    parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn target_of(parts: &Parts) -> String {
    parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string())
}

impl Dispatcher {
    /// Axum router sending every request through [`Dispatcher::dispatch`].
    pub fn into_router(self: Arc<Self>) -> Router {
        Router::new()
            .fallback(dispatch_request)
            .with_state(self)
            .layer(TraceLayer::new_for_http())
            .layer(SetSensitiveRequestHeadersLayer::new([header::COOKIE]))
    }

    pub async fn dispatch(&self, req: Request) -> Response {
        let (mut parts, body) = req.into_parts();
        if is_websocket_upgrade(&parts.headers) {
            return self.dispatch_ws(&mut parts).await;
        }

        let path = parts.uri.path().to_string();
        let found = [TransportKind::Html, TransportKind::Xhr, TransportKind::File]
            .into_iter()
            .find_map(|kind| self.routes.lookup(kind, &path).map(|m| (kind, m)))
            .or_else(|| {
                self.routes
                    .resolve(TransportKind::Html, &path)
                    .ok()
                    .map(|m| (TransportKind::Html, m))
            });
        let Some((kind, route)) = found else {
            debug!(path = %path, "no route");
            return self.stamp((StatusCode::NOT_FOUND, "not found").into_response());
        };

        let identity = match route.class {
            AuthClass::Public => None,
            AuthClass::Authenticated => match self.auth.validate_session(&parts.headers) {
                Some(identity) => Some(identity),
                None => {
                    debug!(path = %path, %kind, "auth rejected");
                    return self.stamp(self.reject(kind, &parts));
                },
            },
        };

        let body = match axum::body::to_bytes(body, self.settings.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %path, error = %e, "request body rejected");
                let response = match kind {
                    TransportKind::Xhr => xhr_error(ErrorShape::new(
                        error_codes::PAYLOAD_TOO_LARGE,
                        "request body too large",
                    )),
                    _ => StatusCode::PAYLOAD_TOO_LARGE.into_response(),
                };
                return self.stamp(response);
            },
        };

        let response = self.execute(kind, route, parts, body, identity).await;
        self.stamp(response)
    }

    async fn execute(
        &self,
        kind: TransportKind,
        route: RouteMatch,
        parts: Parts,
        body: Bytes,
        identity: Option<Identity>,
    ) -> Response {
        let query = parse_query(&parts);
        let info = RequestInfo {
            url: target_of(&parts),
            params: serde_json::json!({ "path": route.params, "query": query }).to_string(),
        };
        let ctx = RequestContext {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            path_params: route.params,
            query,
            body,
            identity,
            version: self.version.snapshot(),
            auth: Arc::clone(&self.auth),
        };

        match route.handler.endpoint() {
            Endpoint::Page(f) => match self.guard.run(info, || f(ctx)).await {
                Guarded::Ok(response) => response,
                Guarded::Failed(_) => html_error_page(),
            },
            Endpoint::Xhr(f) => match self.guard.run(info, || f(ctx)).await {
                Guarded::Ok(Ok(payload)) => xhr_ok(payload),
                Guarded::Ok(Err(error)) => xhr_error(error),
                Guarded::Failed(_) => xhr_error(ErrorShape::internal()),
            },
            Endpoint::Ws(_) => {
                warn!(%kind, handler = route.handler.name(), "ws endpoint on plain request");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            },
        }
    }

    fn reject(&self, kind: TransportKind, parts: &Parts) -> Response {
        match kind {
            TransportKind::Xhr | TransportKind::Ws => xhr_error(ErrorShape::new(
                error_codes::UNAUTHORIZED,
                "authentication required",
            )),
            TransportKind::Html | TransportKind::File => {
                Redirect::to(&login_redirect_target(&self.settings.login_path, &target_of(parts)))
                    .into_response()
            },
        }
    }

    async fn dispatch_ws(&self, parts: &mut Parts) -> Response {
        let path = parts.uri.path().to_string();
        let Some(route) = self.routes.lookup(TransportKind::Ws, &path) else {
            debug!(path = %path, "no ws route");
            return xhr_error(ErrorShape::new(
                error_codes::NOT_FOUND,
                format!("no websocket route for {path}"),
            ));
        };
        let session = match route.class {
            AuthClass::Public => self.auth.session_for(&parts.headers),
            AuthClass::Authenticated => match self.auth.session_for(&parts.headers) {
                Some(session) => Some(session),
                None => {
                    debug!(path = %path, "ws auth rejected");
                    return self.reject(TransportKind::Ws, parts);
                },
            },
        };
        let Endpoint::Ws(procs) = route.handler.endpoint() else {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let upgrade = match WebSocketUpgrade::from_request_parts(parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };
        let (session_id, identity) = match session {
            Some(session) => (Some(session.id), Some(session.identity)),
            None => (None, None),
        };
        let session = WsSession {
            conn_id: uuid::Uuid::new_v4().to_string(),
            route: route.pattern,
            identity,
            session_id,
            procs: Arc::clone(procs),
        };
        let shared = Arc::clone(&self.ws);
        self.stamp(upgrade.on_upgrade(move |socket| run_connection(socket, session, shared)))
    }

    fn stamp(&self, mut response: Response) -> Response {
        if let Ok(value) = HeaderValue::from_str(&self.version.snapshot()) {
            response.headers_mut().insert(VERSION_HEADER, value);
        }
        response
    }
}

async fn dispatch_request(State(dispatcher): State<Arc<Dispatcher>>, req: Request<Body>) -> Response {
    dispatcher.dispatch(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_websocket_upgrade_case_insensitively() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_websocket_upgrade(&headers));
    }

    #[test]
    fn login_redirect_encodes_next() {
        assert_eq!(
            login_redirect_target("/login", "/dash?tab=a&b=1"),
            "/login?next=%2Fdash%3Ftab%3Da%26b%3D1"
        );
    }
}
