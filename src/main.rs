//! Secretscan binary — thin CLI shell over the [`secretscan_server`] library crate.

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use secretscan_server::api::*;
use secretscan_server::classify::Classifier;
use secretscan_server::config::{Config, HubKind};
use secretscan_server::courier::Courier;
use secretscan_server::credentials::CredentialProvider;
use secretscan_server::detect::load_framework_rules;
use secretscan_server::fetch::Fetcher;
use secretscan_server::queue::{JobQueue, WorkerContext, WorkerPool};
use secretscan_server::rules::RuleCatalog;

/// Maximum accepted upload size for `/local_scan` archives.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Secret-scanning job server — scans repository archives for leaked
/// credentials and delivers verdicts to a callback URL.
#[derive(Parser)]
#[command(name = "secretscan", version, about, long_about = None)]
struct Cli {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("secretscan=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Configuration error");
            std::process::exit(1);
        }
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    if let Err(e) = config.ensure_directories() {
        error!(error = %e, "Could not create on-disk layout");
        std::process::exit(1);
    }

    let cpu_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    info!(host = config.host.as_str(), port = config.port, "Secret scanner service starting");
    info!(
        hub = match config.hub {
            HubKind::GitHub => "github",
            HubKind::SelfHosted => "self-hosted",
        },
        max_workers = config.max_workers,
        cpus = cpu_count,
        temp_dir = %config.temp_dir.display(),
        "Runtime configuration"
    );

    // Rule catalog: immutable after load; one bad rule is dropped, a missing
    // rules file is fatal.
    let catalog = match RuleCatalog::load(
        &config.rules_path(),
        &config.excluded_files_path(),
        &config.excluded_extensions_path(),
        &config.false_positive_path(),
    ) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "Failed to load rule catalog");
            std::process::exit(1);
        }
    };
    info!(rules = catalog.rules().len(), "Rule catalog loaded");

    let frameworks = Arc::new(load_framework_rules(&config.frameworks_path()));
    if frameworks.is_empty() {
        warn!("No framework rules loaded; framework detection is disabled");
    }

    // Classifier: load persisted artifacts or train once, off the runtime.
    let config = Arc::new(config);
    let classifier = {
        let config = Arc::clone(&config);
        match tokio::task::spawn_blocking(move || Classifier::initialize(&config)).await {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => {
                error!(error = %e, "Classifier initialization failed");
                eprintln!("  Provide Model/ artifacts or Datasets/ training corpora.");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "Classifier initialization panicked");
                std::process::exit(1);
            }
        }
    };

    let credentials = CredentialProvider::load(&config);
    let fetcher = match Fetcher::new(config.hub, credentials) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            error!(error = %e, "Failed to build platform HTTP client");
            std::process::exit(1);
        }
    };
    let courier = match Courier::new() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "Failed to build callback HTTP client");
            std::process::exit(1);
        }
    };

    // Queue and worker pool
    let queue = JobQueue::new(config.max_workers);
    let worker_ctx = WorkerContext::new(
        Arc::clone(&config),
        Arc::clone(&queue),
        Arc::clone(&catalog),
        classifier,
        Arc::clone(&fetcher),
        Arc::clone(&courier),
        frameworks,
    );
    let pool = WorkerPool::start(worker_ctx);

    // HTTP surface
    let ctx = AppContext { config: Arc::clone(&config), queue, fetcher };

    let app = Router::new()
        .route("/health", get(api_health))
        .route("/scan", post(api_scan))
        .route("/multi_scan", post(api_multi_scan))
        .route("/local_scan", post(api_local_scan))
        .route("/get-rules", get(api_get_rules))
        .route("/update-rules", post(api_update_rules))
        .route("/get-excluded-files", get(api_get_excluded_files))
        .route("/update-excluded-files", post(api_update_excluded_files))
        .route("/get-excluded-extensions", get(api_get_excluded_extensions))
        .route("/update-excluded-extensions", post(api_update_excluded_extensions))
        .route("/get-fp", get(api_get_false_positives))
        .route("/update-fp", post(api_update_false_positives))
        .route("/update-pat-token", post(api_update_pat_token))
        .layer(axum::middleware::from_fn_with_state(ctx.clone(), require_api_key))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(ctx);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(l) => l,
        Err(e) => {
            error!(bind = bind.as_str(), error = %e, "Could not bind");
            std::process::exit(1);
        }
    };
    info!("http://{bind}");

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "Server error");
    }

    // Dispatchers are cancelled; in-flight jobs get a bounded grace window.
    pool.shutdown().await;
    info!("Service stopped");
}
