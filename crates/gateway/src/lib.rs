//! HTTP and WebSocket front door for a switchyard application.
//!
//! Lifecycle:
//! 1. [`initialize`] configures cookie auth, starts the version tracker,
//!    checks the panic callback and builds the route table
//! 2. [`Gateway::router`] (or [`Gateway::serve`]) dispatches every request
//!    through match, auth gate, guarded execution and response stamping
//! 3. [`Gateway::deinitialize`] stops background watchers
//!
//! Routes come in four transport kinds (HTML pages, XHR JSON endpoints,
//! WebSocket procedure endpoints and static FILE routes) and two auth
//! classes. See [`routes`] for the matching rules.

pub mod dispatch;
pub mod error;
pub mod frames;
pub mod guard;
pub mod handler;
pub mod routes;
pub mod server;
pub mod summary;
pub mod version;
pub mod ws;

pub use {
    dispatch::{DispatchSettings, Dispatcher, VERSION_HEADER},
    error::{InitError, ResolveError, RouteError, VersionError},
    frames::{ErrorShape, error_codes},
    guard::{Guarded, PanicGuard, RequestInfo},
    handler::{CallResult, Endpoint, Handler, ProcRegistry, RequestContext, WsCall},
    routes::{AuthClass, RouteMatch, RouteSummaryEntry, RouteTable, TransportKind, route_synonyms},
    server::{
        Dirs, Gateway, GatewayContext, HandlerSet, Handlers, VERSION_TRACK_FILE,
        build_route_table, initialize,
    },
    summary::render_summary,
    version::{OnVersionChange, VersionTracker},
    ws::{ConnectionRegistry, DEAUTH_CLOSE_CODE},
};
