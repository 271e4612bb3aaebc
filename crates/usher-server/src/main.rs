use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use usher_core::{EngineConfig, PriorityQueue, QueueEngine, SqliteQueue};
use usher_server::routes::{build_router, AppState};

/// Multi-channel priority message queue server.
#[derive(Parser)]
#[command(name = "usher", about = "Multi-channel priority message queue server")]
struct Cli {
    /// Use the in-memory engine instead of SQLite
    #[arg(short, long)]
    mem: bool,

    /// Persistence prefix for the in-memory engine; state is kept in
    /// <prefix>.sav and <prefix>.wal. Omit for a volatile queue.
    #[arg(short, long)]
    file: Option<String>,

    /// SQLite database file
    #[arg(long, default_value = "queue.db")]
    db: String,

    /// SQLite table name
    #[arg(long, default_value = "queue_items")]
    table: String,

    /// Listen port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// API key; falls back to the API_KEY environment variable
    #[arg(short = 'k', long)]
    api_key: Option<String>,

    /// Reservation timeout in seconds for the expiry sweeper
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    reservation_timeout: u64,

    /// Verbose logging (debug level unless RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    usher_core::telemetry::init_tracing(cli.verbose);

    let api_key = cli
        .api_key
        .or_else(|| std::env::var("API_KEY").ok())
        .filter(|key| !key.is_empty());
    let Some(api_key) = api_key else {
        error!("API key is required (use --api-key or set API_KEY)");
        std::process::exit(1);
    };

    let queue: Arc<dyn PriorityQueue> = if cli.mem {
        match &cli.file {
            None => {
                info!("using in-memory queue without persistence");
                Arc::new(QueueEngine::in_memory(EngineConfig::default()))
            }
            Some(prefix) => {
                info!(prefix, "using persistent in-memory queue");
                match QueueEngine::persistent(EngineConfig::default(), prefix) {
                    Ok(engine) => Arc::new(engine),
                    Err(e) => {
                        error!(error = %e, "failed to open persistent queue");
                        std::process::exit(1);
                    }
                }
            }
        }
    } else {
        info!(db = %cli.db, table = %cli.table, "using sqlite queue");
        match SqliteQueue::open(&cli.db, &cli.table, true) {
            Ok(queue) => Arc::new(queue),
            Err(e) => {
                error!(error = %e, "failed to open sqlite queue");
                std::process::exit(1);
            }
        }
    };

    let state = Arc::new(AppState {
        queue: Arc::clone(&queue),
        api_key,
    });
    let app = build_router(state);

    // Expired reservations are swept at half the timeout so a reservation
    // is re-delivered at most 1.5x the timeout after it was taken.
    let timeout = Duration::from_secs(cli.reservation_timeout);
    let sweeper = Arc::clone(&queue);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(timeout / 2);
        loop {
            ticker.tick().await;
            let (requeued, err) = sweeper.requeue_expired_reservations(timeout);
            if let Some(e) = err {
                warn!(error = %e, requeued, "expired-reservation sweep failed part way");
            } else if requeued > 0 {
                info!(requeued, "requeued expired reservations");
            }
        }
    });

    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(%addr, "starting http server");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
    info!("server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to install CTRL+C handler");
    }

    info!("received shutdown signal");
}
