use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use chatsift::backend::LocalBackend;
use chatsift::cache::SharedResources;
use chatsift::channels::{FrontendContext, SocketBridge, ws_routes};
use chatsift::config::AppConfig;
use chatsift::handlers::register_default_handlers;
use chatsift::worker::{HandlerRegistry, ShutdownCoordinator, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    // Initialize tracing, with an optional daily log file next to stderr
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "chatsift.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("🔎 Chatsift v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Data: {}", config.data_dir.display());
    eprintln!("   Socket: {}", config.socket_addr());
    eprintln!("   WS: ws://{}/ws", config.ws_addr());

    // ── Resources ────────────────────────────────────────────────────────
    let backend = LocalBackend::new(&config.data_dir);
    backend
        .ensure_dirs()
        .with_context(|| format!("cannot prepare {}", config.data_dir.display()))?;
    let resources = Arc::new(SharedResources::new(Arc::new(backend)));

    // ── Worker pool ──────────────────────────────────────────────────────
    let mut handlers = HandlerRegistry::new();
    register_default_handlers(&mut handlers, Arc::clone(&resources), config.handler_settings());
    let pool = WorkerPool::start(&config.pool, handlers).context("cannot start worker pool")?;
    eprintln!(
        "   Workers: {} ({} dedicated)\n",
        pool.len(),
        config.pool.dedicated_total()
    );

    let ctx = Arc::new(FrontendContext {
        dispatcher: pool.dispatcher(),
        resources: Arc::clone(&resources),
        default_search_engine: config.default_search_engine.clone(),
        excluded_users: config.excluded_users.clone(),
    });

    // ── Front ends ───────────────────────────────────────────────────────
    let bridge = SocketBridge::bind(&config.socket_addr(), Arc::clone(&ctx), config.socket_delimiter.clone())
        .await
        .context("cannot start socket bridge")?;
    tokio::spawn(async move {
        if let Err(e) = bridge.serve().await {
            error!(error = %e, "Socket bridge stopped");
        }
    });

    let listener = tokio::net::TcpListener::bind(config.ws_addr())
        .await
        .with_context(|| format!("cannot bind {}", config.ws_addr()))?;
    info!(addr = %config.ws_addr(), "WebSocket server listening");
    let app = ws_routes(ctx);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "WebSocket server stopped");
        }
    });

    // ── Shutdown ─────────────────────────────────────────────────────────
    let report = ShutdownCoordinator::new(pool)
        .with_resources(resources)
        .wait_for_signal()
        .await
        .context("shutdown failed")?;
    if report.flush_failures > 0 {
        warn!(failures = report.flush_failures, "Some resources could not be saved");
    }
    Ok(())
}
