use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    axum::Router,
    switchyard_auth::{ConfigError, CookieSettings, Identity, SessionAuthenticator},
    switchyard_common::OnPanic,
    tracing::{debug, info},
};

use crate::{
    dispatch::{DispatchSettings, Dispatcher},
    error::{InitError, RouteError},
    guard::PanicGuard,
    handler::Handler,
    routes::{AuthClass, RouteTable, TransportKind},
    summary::render_summary,
    version::{OnVersionChange, VersionTracker},
    ws::{ConnectionRegistry, WsShared},
};

/// File name of the version tracking CSV inside `version_file_dir`.
pub const VERSION_TRACK_FILE: &str = "version_track.csv";

const PURGE_INTERVAL: Duration = Duration::from_secs(300);

// ── Startup context ──────────────────────────────────────────────────────────

/// Public and authenticated handlers of one transport kind. Keys may hold
/// `|`-separated synonyms.
#[derive(Default, Clone)]
pub struct HandlerSet {
    pub public: Vec<(String, Handler)>,
    pub authd: Vec<(String, Handler)>,
}

#[derive(Default, Clone)]
pub struct Handlers {
    pub html: HandlerSet,
    pub xhr: HandlerSet,
    pub ws: HandlerSet,
    /// FILE routes are public only.
    pub file: Vec<(String, Handler)>,
    pub not_found: Option<Handler>,
}

#[derive(Debug, Clone)]
pub struct Dirs {
    pub version_file_dir: PathBuf,
    pub app_watch_notify: PathBuf,
}

/// Everything [`initialize`] needs.
#[derive(Clone)]
pub struct GatewayContext {
    pub auth: CookieSettings,
    /// Without dirs the version is fixed to the crate version.
    pub dirs: Option<Dirs>,
    pub login_path: String,
    pub max_body_bytes: usize,
    pub on_panic: Option<OnPanic>,
    pub handlers: Handlers,
}

impl Default for GatewayContext {
    fn default() -> Self {
        let settings = DispatchSettings::default();
        Self {
            auth: CookieSettings::default(),
            dirs: None,
            login_path: settings.login_path,
            max_body_bytes: settings.max_body_bytes,
            on_panic: None,
            handlers: Handlers::default(),
        }
    }
}

/// Build the route table from handler maps, in summary order.
pub fn build_route_table(handlers: &Handlers) -> Result<RouteTable, RouteError> {
    let mut table = RouteTable::new();
    for (kind, set) in [
        (TransportKind::Html, &handlers.html),
        (TransportKind::Xhr, &handlers.xhr),
        (TransportKind::Ws, &handlers.ws),
    ] {
        table.register_all(kind, AuthClass::Public, set.public.iter().cloned())?;
        table.register_all(kind, AuthClass::Authenticated, set.authd.iter().cloned())?;
    }
    table.register_all(TransportKind::File, AuthClass::Public, handlers.file.iter().cloned())?;
    if let Some(nf) = &handlers.not_found {
        table.set_not_found(nf.clone())?;
    }
    Ok(table)
}

fn on_app_version_changed(version: &str) {
    info!(version, "app version changed, clients will be notified");
}

// ── Gateway ──────────────────────────────────────────────────────────────────

/// A fully wired gateway, ready to serve.
pub struct Gateway {
    auth: Arc<SessionAuthenticator>,
    version: Arc<VersionTracker>,
    connections: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    deinitialized: AtomicBool,
}

/// Wire up auth, version tracking, panic reporting, the WS layer and the
/// router. Any failure aborts startup.
pub fn initialize(ctx: GatewayContext) -> Result<Gateway, InitError> {
    let connections = Arc::new(ConnectionRegistry::new());

    let auth = Arc::new(SessionAuthenticator::configure(ctx.auth, ctx.on_panic.clone())?);
    let registry = Arc::clone(&connections);
    auth.add_deauth_listener(Arc::new(move |identity: &Identity| {
        registry.close_identity(identity);
    }));

    let version = match &ctx.dirs {
        Some(dirs) => {
            let on_change: OnVersionChange = Arc::new(on_app_version_changed);
            VersionTracker::start(
                dirs.version_file_dir.join(VERSION_TRACK_FILE),
                &dirs.app_watch_notify,
                Some(on_change),
            )?
        },
        None => VersionTracker::fixed(env!("CARGO_PKG_VERSION")),
    };
    let version = Arc::new(version);
    info!(version = %version.current_version(), "initial app version");

    let on_panic = ctx.on_panic.ok_or(ConfigError::MissingPanicHandler)?;
    let guard = PanicGuard::new(on_panic);

    let ws = Arc::new(WsShared {
        registry: Arc::clone(&connections),
        guard: guard.clone(),
        version: Arc::clone(&version),
        auth: Arc::clone(&auth),
    });

    let routes = build_route_table(&ctx.handlers)?;
    for line in render_summary(&routes.summarize()) {
        info!("{line}");
    }

    let dispatcher = Arc::new(Dispatcher {
        routes: Arc::new(routes),
        auth: Arc::clone(&auth),
        guard,
        version: Arc::clone(&version),
        ws,
        settings: DispatchSettings {
            login_path: ctx.login_path,
            max_body_bytes: ctx.max_body_bytes,
        },
    });

    Ok(Gateway {
        auth,
        version,
        connections,
        dispatcher,
        deinitialized: AtomicBool::new(false),
    })
}

impl Gateway {
    pub fn router(&self) -> Router {
        Arc::clone(&self.dispatcher).into_router()
    }

    pub fn auth(&self) -> &Arc<SessionAuthenticator> {
        &self.auth
    }

    pub fn version(&self) -> &Arc<VersionTracker> {
        &self.version
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn routes(&self) -> &RouteTable {
        &self.dispatcher.routes
    }

    /// Bind and serve until ctrl-c, then deinitialize.
    pub async fn serve(&self, bind: &str, port: u16) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{bind}:{port}").parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            addr = %listener.local_addr()?,
            version = %self.version.current_version(),
            "switchyard gateway listening"
        );

        let auth = Arc::clone(&self.auth);
        let purge = tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let purged = auth.purge_expired();
                if purged > 0 {
                    debug!(purged, "expired sessions purged");
                }
            }
        });

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await;
        purge.abort();
        self.deinitialize();
        served?;
        Ok(())
    }

    /// Stop the version tracker. Safe to call more than once.
    pub fn deinitialize(&self) {
        if self.deinitialized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.version.stop();
        info!("gateway deinitialized");
    }
}
