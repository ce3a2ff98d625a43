use anyhow::{Context, Result};
use clap::Parser;
use procsman_http::auth::AuthKey;
use procsman_http::AppState;
use procsman_notify::{NotificationsSettings, Notifier, TelegramNotifier};
use procsman_store::{MemoryStore, SharedStore};
use procsman_supervisor::{load_or_create_defaults, AdminService, ProcsmanConfig, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// procsman - process supervisor with an admin HTTP interface
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (JSON)
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,

    /// Address to serve the admin HTTP API on
    #[arg(long, default_value = "127.0.0.1:54580")]
    serve: String,

    /// Allow-origin value for CORS responses
    #[arg(long, default_value = "*")]
    allow_origin: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    initialize_logging(args.debug);

    info!("starting procsman");
    info!(config = %args.config.display(), "loading configuration");

    let config = ProcsmanConfig::load(&args.config)?;
    let defaults = load_or_create_defaults(std::path::Path::new("default_process_config.json"))?;
    let settings = NotificationsSettings::load_or_create(std::path::Path::new(
        "notifications.json",
    ))
    .context("loading notifications.json")?;

    let store: SharedStore = Arc::new(MemoryStore::new());
    let notifier = Arc::new(TelegramNotifier::new(
        settings,
        PathBuf::from("notifications.json"),
    ));

    let supervisor = Supervisor::new(
        Arc::clone(&store),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        &config,
        defaults,
    )
    .await
    .map_err(|e| anyhow::anyhow!("starting supervisor: {}", e))?;

    let auth = Arc::new(
        AuthKey::load_or_create(std::path::Path::new("auth.key")).context("loading auth.key")?,
    );
    let state = AppState {
        admin: AdminService::new(supervisor.clone()),
        notifier,
        auth,
        allow_origin: args
            .allow_origin
            .parse()
            .context("invalid allow-origin value")?,
    };

    let listener = tokio::net::TcpListener::bind(&args.serve)
        .await
        .with_context(|| format!("binding {}", args.serve))?;

    procsman_http::serve(listener, state, shutdown_signal())
        .await
        .context("admin interface failed")?;

    info!("shutting down supervisor");
    supervisor.shutdown(SHUTDOWN_DEADLINE).await;
    info!("procsman stopped");
    Ok(())
}

fn initialize_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler");
        let mut sigint =
            signal::unix::signal(signal::unix::SignalKind::interrupt()).expect("SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        let _ = signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}
