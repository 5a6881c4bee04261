//! HELSSA gate - HMAC request enforcement daemon.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use helssa_gate::auth::SecretProvider;
use helssa_gate::clock::SystemClock;
use helssa_gate::config::{Settings, StoreBackend};
use helssa_gate::gate::{AdmitHandler, Gate};
use helssa_gate::socket::SocketListener;
use helssa_gate::store::{BoundedStore, CacheStore, MemoryStore, RedisStore, RedisStoreConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");
const DEFAULT_CONFIG_PATH: &str = "/etc/helssa/gate.toml";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", NAME, VERSION);
        return ExitCode::SUCCESS;
    }

    let config_path = get_config_path(&args);

    let settings = match Settings::load(&config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&settings) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting {} v{}", NAME, VERSION);
    info!("Configuration loaded from: {}", config_path);
    info!("Socket path: {}", settings.socket.path.display());
    info!("Log level: {}", settings.logging.level);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Gate failed");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = build_store(&settings).await?;

    let secrets = settings.secret_provider();
    if let Err(e) = secrets.secret() {
        // Protected requests fail with SECRET_NOT_CONFIGURED until this is fixed.
        warn!(
            reason = e.config_reason().map(|r| r.as_str()),
            error = %e,
            "Shared secret unavailable at startup"
        );
    }

    let gate = Arc::new(Gate::new(
        settings.gate_config(),
        store,
        secrets,
        Arc::new(SystemClock::new()),
    ));
    info!(
        protected = ?gate.config().protected_paths,
        max_skew_seconds = gate.config().max_skew_seconds,
        rate_limited = gate.config().rate_limit.is_some(),
        "Gate configured"
    );

    let listener = SocketListener::bind(&settings, gate, Arc::new(AdmitHandler)).await?;

    let shutdown = Arc::new(Notify::new());

    tokio::select! {
        result = listener.run(Arc::clone(&shutdown)) => {
            if let Err(e) = result {
                error!(error = %e, "Socket listener failed");
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
            shutdown.notify_waiters();

            let drain_timeout = Duration::from_secs(30);
            match tokio::time::timeout(drain_timeout, listener.wait_for_drain()).await {
                Ok(()) => info!("Graceful shutdown complete"),
                Err(_) => warn!(
                    "Shutdown timeout after {}s, some connections may be terminated",
                    drain_timeout.as_secs()
                ),
            }
        }
    }

    info!("Gate stopped");
    Ok(())
}

/// Build the configured store, bounded by the operation timeout.
async fn build_store(
    settings: &Settings,
) -> Result<Arc<dyn CacheStore>, Box<dyn std::error::Error>> {
    let config = &settings.store;

    let backend: Arc<dyn CacheStore> = match config.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            store.start_cleanup_task(Duration::from_secs(config.cleanup_interval_seconds));
            info!("Using in-memory store (single process only)");
            store
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect_with_config(
                &config.url,
                RedisStoreConfig {
                    key_prefix: config.key_prefix.clone(),
                },
            )
            .await?;
            info!(prefix = %config.key_prefix, "Using Redis store");
            Arc::new(store)
        }
    };

    Ok(Arc::new(BoundedStore::new(
        backend,
        Duration::from_millis(config.op_timeout_ms),
    )))
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_help() {
    println!(
        r#"{} {}
HMAC request enforcement gate for the HELSSA API.

USAGE:
    {} [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: {}]
    -h, --help             Print help information
    -V, --version          Print version information
"#,
        NAME, VERSION, NAME, DEFAULT_CONFIG_PATH
    );
}

/// Get configuration file path from command line arguments.
fn get_config_path(args: &[String]) -> String {
    for (i, arg) in args.iter().enumerate() {
        if (arg == "--config" || arg == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}

/// Initialize logging based on settings.
fn init_logging(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match settings.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}
