use std::{collections::HashMap, fmt, future::Future, pin::Pin, sync::Arc};

use {
    axum::{
        body::Bytes,
        http::{HeaderMap, Method, Uri},
        response::Response,
    },
    serde::de::DeserializeOwned,
    serde_json::Value,
    switchyard_auth::{Identity, SessionAuthenticator},
};

use crate::frames::{ErrorShape, error_codes};

// ── Types ────────────────────────────────────────────────────────────────────

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The result an XHR handler or WS procedure produces.
pub type CallResult = Result<Value, ErrorShape>;

/// HTML and FILE routes, and the HTML not-found handler.
pub type PageFn = Arc<dyn Fn(RequestContext) -> BoxFuture<Response> + Send + Sync>;

/// XHR routes. The value is wrapped in the `{"ok":true,"payload":...}` envelope.
pub type XhrFn = Arc<dyn Fn(RequestContext) -> BoxFuture<CallResult> + Send + Sync>;

/// One named procedure of a WebSocket route.
pub type ProcFn = Arc<dyn Fn(WsCall) -> BoxFuture<CallResult> + Send + Sync>;

/// Everything a page or XHR handler can see about its request.
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Captures from `{name}` segments of the matched pattern.
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
    /// Set on authenticated routes only.
    pub identity: Option<Identity>,
    /// Application version when the request was dispatched.
    pub version: Arc<str>,
    pub auth: Arc<SessionAuthenticator>,
}

impl RequestContext {
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// Body parsed as `application/x-www-form-urlencoded`.
    pub fn form(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(&self.body)
            .into_owned()
            .collect()
    }

    /// Body parsed as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ErrorShape> {
        serde_json::from_slice(&self.body)
            .map_err(|e| {
                ErrorShape::new(error_codes::INVALID_REQUEST, format!("invalid JSON body: {e}"))
            })
    }
}

/// A procedure invocation received on a live WebSocket.
pub struct WsCall {
    pub conn_id: String,
    pub route: String,
    pub identity: Option<Identity>,
    pub params: Value,
    pub version: Arc<str>,
    pub auth: Arc<SessionAuthenticator>,
}

// ── Procedure registry ───────────────────────────────────────────────────────

/// Named procedures served by one WebSocket route.
#[derive(Default, Clone)]
pub struct ProcRegistry {
    procs: HashMap<String, ProcFn>,
}

impl ProcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(WsCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        self.procs
            .insert(name.into(), Arc::new(move |call: WsCall| -> BoxFuture<CallResult> {
                Box::pin(f(call))
            }));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ProcFn> {
        self.procs.get(name)
    }
}

// ── Handler ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum Endpoint {
    Page(PageFn),
    Xhr(XhrFn),
    Ws(Arc<ProcRegistry>),
}

impl Endpoint {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Page(_) => "page",
            Self::Xhr(_) => "xhr",
            Self::Ws(_) => "ws",
        }
    }
}

/// A registered callable plus the identity shown in the route summary.
#[derive(Clone)]
pub struct Handler {
    name: String,
    module: String,
    endpoint: Endpoint,
}

impl Handler {
    /// `module` is normally `module_path!()` at the call site.
    pub fn page<F, Fut>(name: impl Into<String>, module: impl Into<String>, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self {
            name: name.into(),
            module: module.into(),
            endpoint: Endpoint::Page(Arc::new(move |ctx: RequestContext| -> BoxFuture<Response> {
                Box::pin(f(ctx))
            })),
        }
    }

    pub fn xhr<F, Fut>(name: impl Into<String>, module: impl Into<String>, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            module: module.into(),
            endpoint: Endpoint::Xhr(Arc::new(move |ctx: RequestContext| -> BoxFuture<CallResult> {
                Box::pin(f(ctx))
            })),
        }
    }

    pub fn ws(name: impl Into<String>, module: impl Into<String>, procs: ProcRegistry) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            endpoint: Endpoint::Ws(Arc::new(procs)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// True when both handles point at the same underlying callable.
    pub fn same_as(&self, other: &Handler) -> bool {
        match (&self.endpoint, &other.endpoint) {
            (Endpoint::Page(a), Endpoint::Page(b)) => Arc::ptr_eq(a, b),
            (Endpoint::Xhr(a), Endpoint::Xhr(b)) => Arc::ptr_eq(a, b),
            (Endpoint::Ws(a), Endpoint::Ws(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("endpoint", &self.endpoint.kind_name())
            .finish()
    }
}
