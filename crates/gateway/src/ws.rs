//! WebSocket connection layer: live connection registry and the per-socket
//! loop that serves procedure calls, version pushes and de-auth closes.

use std::{sync::Arc, time::Instant};

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket},
    dashmap::DashMap,
    futures::{SinkExt, StreamExt},
    serde_json::Value,
    switchyard_auth::{Identity, SessionAuthenticator},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::{
    frames::{CallFrame, ErrorShape, ServerFrame, error_codes},
    guard::{Guarded, PanicGuard, RequestInfo},
    handler::{ProcRegistry, WsCall},
    version::VersionTracker,
};

/// Close code sent after a de-authentication.
pub const DEAUTH_CLOSE_CODE: u16 = 4401;

/// Commands queued to a connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Close { code: u16, reason: String },
}

struct ConnectionHandle {
    identity: Option<Identity>,
    route: String,
    tx: mpsc::UnboundedSender<Outbound>,
    connected_at: Instant,
}

/// Open WebSocket connections keyed by connection id.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        conn_id: &str,
        identity: Option<Identity>,
        route: &str,
        tx: mpsc::UnboundedSender<Outbound>,
    ) {
        self.conns.insert(conn_id.to_string(), ConnectionHandle {
            identity,
            route: route.to_string(),
            tx,
            connected_at: Instant::now(),
        });
    }

    pub fn remove(&self, conn_id: &str) -> bool {
        match self.conns.remove(conn_id) {
            Some((_, handle)) => {
                debug!(
                    conn_id,
                    route = %handle.route,
                    secs = handle.connected_at.elapsed().as_secs(),
                    "ws connection unregistered"
                );
                true
            },
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.conns.len()
    }

    pub fn count_for(&self, identity: &Identity) -> usize {
        self.conns
            .iter()
            .filter(|e| e.identity.as_ref() == Some(identity))
            .count()
    }

    /// Tell every connection of `identity` to send a deauth frame and close.
    /// Returns the number of connections notified.
    pub fn close_identity(&self, identity: &Identity) -> usize {
        let mut closed = 0;
        for entry in self.conns.iter() {
            if entry.identity.as_ref() == Some(identity) && queue_deauth(&entry.tx) {
                closed += 1;
            }
        }
        if closed > 0 {
            info!(identity = %identity, connections = closed, "closing ws connections");
        }
        closed
    }
}

/// Queue the deauth frame followed by a 4401 close.
fn queue_deauth(tx: &mpsc::UnboundedSender<Outbound>) -> bool {
    tx.send(Outbound::Frame(ServerFrame::Deauth.to_json())).is_ok()
        && tx
            .send(Outbound::Close {
                code: DEAUTH_CLOSE_CODE,
                reason: "de-authenticated".into(),
            })
            .is_ok()
}

/// State shared by all WebSocket connections.
pub struct WsShared {
    pub registry: Arc<ConnectionRegistry>,
    pub guard: PanicGuard,
    pub version: Arc<VersionTracker>,
    pub auth: Arc<SessionAuthenticator>,
}

/// One accepted upgrade.
pub struct WsSession {
    pub conn_id: String,
    pub route: String,
    pub identity: Option<Identity>,
    /// Session the upgrade was authorized with.
    pub session_id: Option<String>,
    pub procs: Arc<ProcRegistry>,
}

/// Serve one WebSocket until the peer leaves or the server closes it.
pub async fn run_connection(socket: WebSocket, session: WsSession, shared: Arc<WsShared>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    shared
        .registry
        .register(&session.conn_id, session.identity.clone(), &session.route, tx.clone());
    info!(conn_id = %session.conn_id, route = %session.route, "ws connected");

    close_if_revoked(&session, &shared.auth, &tx);

    let mut version_rx = shared.version.subscribe();
    let hello = ServerFrame::Hello {
        conn_id: session.conn_id.clone(),
        version: version_rx.borrow_and_update().to_string(),
    };
    let mut open = ws_tx.send(Message::Text(hello.to_json().into())).await.is_ok();
    let mut version_open = true;

    while open {
        tokio::select! {
            out = rx.recv() => match out {
                Some(Outbound::Frame(text)) => {
                    open = ws_tx.send(Message::Text(text.into())).await.is_ok();
                },
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    open = false;
                },
                None => open = false,
            },
            changed = version_rx.changed(), if version_open => {
                if changed.is_err() {
                    version_open = false;
                    continue;
                }
                let version = version_rx.borrow_and_update().to_string();
                let frame = ServerFrame::Version { version };
                open = ws_tx.send(Message::Text(frame.to_json().into())).await.is_ok();
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_text(text.as_str(), &session, &shared, &tx);
                },
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_text(text, &session, &shared, &tx),
                    Err(_) => reply(&tx, ServerFrame::err(
                        String::new(),
                        ErrorShape::new(error_codes::INVALID_FRAME, "binary frame is not UTF-8"),
                    )),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {},
                Some(Ok(Message::Close(_))) | None => open = false,
                Some(Err(e)) => {
                    warn!(conn_id = %session.conn_id, error = %e, "ws receive failed");
                    open = false;
                },
            },
        }
    }

    shared.registry.remove(&session.conn_id);
    info!(conn_id = %session.conn_id, "ws disconnected");
}

/// A de-auth that ran between the upgrade check and registration had nothing
/// to close, so the session is checked again once the connection is visible.
fn close_if_revoked(
    session: &WsSession,
    auth: &SessionAuthenticator,
    tx: &mpsc::UnboundedSender<Outbound>,
) -> bool {
    let revoked = session
        .session_id
        .as_deref()
        .is_some_and(|id| !auth.is_session_live(id));
    if revoked {
        debug!(conn_id = %session.conn_id, "session revoked before registration");
        queue_deauth(tx);
    }
    revoked
}

fn reply(tx: &mpsc::UnboundedSender<Outbound>, frame: ServerFrame) {
    let _ = tx.send(Outbound::Frame(frame.to_json()));
}

fn handle_text(
    text: &str,
    session: &WsSession,
    shared: &Arc<WsShared>,
    tx: &mpsc::UnboundedSender<Outbound>,
) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            return reply(
                tx,
                ServerFrame::err(
                    String::new(),
                    ErrorShape::new(error_codes::INVALID_FRAME, format!("invalid JSON: {e}")),
                ),
            );
        },
    };
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let call: CallFrame = match serde_json::from_value(value) {
        Ok(c) => c,
        Err(e) => {
            return reply(
                tx,
                ServerFrame::err(id, ErrorShape::new(error_codes::INVALID_FRAME, e.to_string())),
            );
        },
    };
    let Some(proc_fn) = session.procs.get(&call.proc).cloned() else {
        return reply(
            tx,
            ServerFrame::err(
                call.id,
                ErrorShape::new(
                    error_codes::UNKNOWN_PROC,
                    format!("unknown procedure {:?}", call.proc),
                ),
            ),
        );
    };

    debug!(conn_id = %session.conn_id, proc = %call.proc, "ws call");
    let info = RequestInfo {
        url: format!("{}#{}", session.route, call.proc),
        params: call.params.to_string(),
    };
    let ws_call = WsCall {
        conn_id: session.conn_id.clone(),
        route: session.route.clone(),
        identity: session.identity.clone(),
        params: call.params,
        version: shared.version.snapshot(),
        auth: Arc::clone(&shared.auth),
    };
    let shared = Arc::clone(shared);
    let tx = tx.clone();
    let id = call.id;
    tokio::spawn(async move {
        let frame = match shared.guard.run(info, move || proc_fn(ws_call)).await {
            Guarded::Ok(Ok(payload)) => ServerFrame::ok(id, payload),
            Guarded::Ok(Err(error)) => ServerFrame::err(id, error),
            Guarded::Failed(_) => ServerFrame::err(id, ErrorShape::internal()),
        };
        reply(&tx, frame);
    });
}
