//! `mockit` — the process entry point for the mock server manager.
//!
//! `mockit serve` reads a startup configuration document (JsonMC), brings
//! up every declared instance through the Instance Lifecycle Manager, starts
//! the control-plane REST API, and blocks until SIGINT/SIGTERM, at which
//! point it drains every instance and exits cleanly. `mockit validate` runs
//! the same configuration parse/bring-up path against a throwaway registry
//! so a bad document can be caught in CI without binding any real port.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use mockit_core::config::InstanceSpec;
use mockit_core::loader;
use mockit_core::oauth2_cache::TokenCache;
use mockit_core::registry::{ListenerFactory, ListenerHandle, Registry, ResolvedTls};
use mockit_core::tls_material::TlsMaterialStore;
use mockit_core::Result as CoreResult;
use mockit_http::management::{self, ManagementState};
use mockit_http::AxumListenerFactory;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mockit")]
#[command(about = "Programmable multi-instance HTTP mock server manager")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Log verbosity: error, warn, info, debug, trace.
    #[arg(short = 'v', long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a configuration document, bring up its instances, and serve
    /// the control-plane REST API until shutdown.
    Serve(ServeArgs),
    /// Parse and validate a configuration document without binding any
    /// listener or starting the control-plane API.
    Validate(ValidateArgs),
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Path to the JsonMC startup configuration document. Equivalent to
    /// the `mock.server.config.file` configuration property.
    #[arg(short, long, env = "MOCK_SERVER_CONFIG_FILE")]
    config: PathBuf,

    /// Address the control-plane REST API binds to.
    #[arg(long, default_value = "127.0.0.1:9000")]
    admin_addr: SocketAddr,
}

#[derive(clap::Args)]
struct ValidateArgs {
    /// Path to the JsonMC startup configuration document.
    #[arg(short, long, env = "MOCK_SERVER_CONFIG_FILE")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result = match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Validate(args) => run_validate(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            tracing::error!("{message}");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// A listener that never actually binds a port, so `mockit validate` can
/// exercise the full parse/create/expectation-count path without racing
/// real sockets.
struct NoopListenerHandle;

#[async_trait]
impl ListenerHandle for NoopListenerHandle {
    async fn shutdown(&self, _timeout: Duration) {}
}

struct NoopListenerFactory;

#[async_trait]
impl ListenerFactory for NoopListenerFactory {
    async fn bind(&self, _spec: &InstanceSpec, _tls: Option<ResolvedTls>) -> CoreResult<Arc<dyn ListenerHandle>> {
        Ok(Arc::new(NoopListenerHandle))
    }
}

fn build_registry() -> (Arc<Registry>, Arc<AxumListenerFactory>) {
    let token_cache = Arc::new(TokenCache::new());
    let listener_factory = Arc::new(AxumListenerFactory::new(token_cache.clone()));
    let tls_store = Arc::new(TlsMaterialStore::new());
    let registry = Arc::new(Registry::new(listener_factory.clone(), tls_store, token_cache));
    (registry, listener_factory)
}

fn build_validation_registry() -> Arc<Registry> {
    let token_cache = Arc::new(TokenCache::new());
    let tls_store = Arc::new(TlsMaterialStore::new());
    Arc::new(Registry::new(Arc::new(NoopListenerFactory), tls_store, token_cache))
}

async fn run_validate(args: ValidateArgs) -> Result<(), String> {
    let registry = build_validation_registry();
    loader::load(&registry, &args.config).await.map_err(|e| e.to_string())?;
    registry.shutdown_all().await;
    tracing::info!("configuration at {:?} is valid", args.config);
    Ok(())
}

async fn run_serve(args: ServeArgs) -> Result<(), String> {
    let (registry, listener_factory) = build_registry();

    loader::load(&registry, &args.config).await.map_err(|e| e.to_string())?;
    tracing::info!(instances = registry.list().await.len(), "configuration loaded");

    let management_state = ManagementState { registry: registry.clone(), dispatchers: listener_factory.dispatchers() };
    let admin_router = management::router(management_state);

    let listener = tokio::net::TcpListener::bind(args.admin_addr)
        .await
        .map_err(|e| format!("failed to bind control-plane API on {}: {e}", args.admin_addr))?;
    tracing::info!(addr = %args.admin_addr, "control-plane REST API listening");

    let serve = axum::serve(listener, admin_router).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        tracing::warn!("control-plane API server exited with error: {e}");
    }

    tracing::info!("draining instances");
    registry.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
