mod demo;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    switchyard_auth::CookieSettings,
    switchyard_common::PanicReport,
    switchyard_config::SwitchyardConfig,
    switchyard_gateway::{Dirs, GatewayContext, build_route_table, initialize, render_summary},
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "switchyard", about = "switchyard: cookie-auth HTTP and WebSocket gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of discovering `switchyard.{toml,yaml,yml,json}`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Serve {
        /// Overrides `[server] bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `[server] port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the route summary of the demo application and exit.
    Routes,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SwitchyardConfig> {
    match &cli.config {
        Some(path) => switchyard_config::load_config(path),
        None => switchyard_config::discover_and_load(),
    }
}

fn report_panic(report: &PanicReport) {
    error!(
        url = %report.url,
        params = %report.params,
        stack = %report.stack,
        "recovered panic: {}",
        report.message
    );
}

fn gateway_context(config: &SwitchyardConfig) -> GatewayContext {
    let mut store_id = config.auth.cookie_store_id.clone();
    if store_id.is_empty() {
        warn!("auth.cookie_store_id is not set, sessions will not survive a restart");
        store_id = uuid::Uuid::new_v4().to_string();
    }

    if config.dirs.is_partial() {
        warn!("version tracking needs both dirs.version_file_dir and dirs.app_watch_notify");
    }
    let dirs = config
        .dirs
        .watch_pair()
        .map(|(version_file_dir, app_watch_notify)| Dirs {
            version_file_dir: version_file_dir.to_path_buf(),
            app_watch_notify: app_watch_notify.to_path_buf(),
        });

    GatewayContext {
        auth: CookieSettings {
            name: config.auth.cookie_name.clone(),
            store_id,
            path: config.auth.cookie_path.clone(),
            domain: config.auth.cookie_domain.clone(),
            max_age: config.auth.cookie_max_age.clone(),
        },
        dirs,
        login_path: config.server.login_path.clone(),
        max_body_bytes: config.server.max_body_bytes,
        on_panic: Some(Arc::new(report_panic)),
        handlers: demo::handlers(std::env::var("SWITCHYARD_PASSWORD").ok()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Serve { bind, port } => {
            let gateway = initialize(gateway_context(&config))?;
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let port = port.unwrap_or(config.server.port);
            gateway.serve(&bind, port).await
        },
        Commands::Routes => {
            let table = build_route_table(&demo::handlers(None))?;
            for line in render_summary(&table.summarize()) {
                println!("{line}");
            }
            Ok(())
        },
    }
}
