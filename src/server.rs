//! Server initialization and startup logic for cellsync.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cellsync_api::{ApiServer, AppState, MetadataAccessControl, ServerConfig};
use cellsync_config::{Config, ConfigValidator, LoggingConfig, PersistenceConfig, PlatformConfig};
use cellsync_kernel::{
    ContainerProvisioner, KernelOrchestrator, KubePlatform, OrchestratorSettings, ProvisionSettings,
    Recycler, WireCodec, ZmqConnector,
};
use cellsync_protocols::MetadataStore;
use cellsync_replica::{DocumentRegistry, PersistenceSettings, PersistenceWriter};
use cellsync_store::{MemoryMetadataStore, SqliteMetadataStore};

/// Initialize tracing with console and file output.
///
/// Log files are written to `logging.directory` with daily rotation.
pub(crate) fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&logging.directory)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("cellsync")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&logging.directory)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes buffered lines on drop, so it lives for the whole process.
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(logging.json.then(|| fmt::layer().json().with_target(true)))
        .with((!logging.json).then(|| fmt::layer().with_target(true).with_ansi(true)))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

fn persistence_settings(config: &PersistenceConfig) -> PersistenceSettings {
    PersistenceSettings {
        debounce: config.debounce(),
        max_wait: config.max_wait(),
        max_retries: config.max_retries,
        retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        retry_max_delay: Duration::from_millis(config.retry_max_delay_ms),
    }
}

/// Bearer token of the platform API: configured, or read from the mounted account.
fn platform_token(config: &PlatformConfig) -> String {
    if !config.token.is_empty() {
        return config.token.clone();
    }
    match std::fs::read_to_string(&config.token_path) {
        Ok(token) => token.trim().to_string(),
        Err(e) => {
            warn!(
                "No platform token at {}: {}; calling the API anonymously",
                config.token_path.display(),
                e
            );
            String::new()
        }
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn MetadataStore>, Box<dyn std::error::Error>> {
    match config.store.backend.as_str() {
        "memory" => {
            warn!("Using the in-memory store; documents are lost on exit");
            Ok(Arc::new(MemoryMetadataStore::new()))
        }
        "sqlite" => {
            if let Some(parent) = config.store.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteMetadataStore::open(&config.store.path).await?;
            info!("Metadata store at {}", config.store.path.display());
            Ok(Arc::new(store))
        }
        other => Err(format!("Unknown store backend: {}", other).into()),
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Run the server in foreground until a shutdown signal.
pub(crate) async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting cellsync v{}", env!("CARGO_PKG_VERSION"));

    let validation = ConfigValidator::validate(&config)?;
    for warning in &validation.warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }
    if !validation.is_valid() {
        for err in &validation.errors {
            error!("Config {}: {}", err.path, err.message);
        }
        return Err("invalid configuration".into());
    }
    if config.read_only {
        info!("Running read-only");
    }

    let store = open_store(&config).await?;
    let writer = PersistenceWriter::new(store.clone(), persistence_settings(&config.persistence));
    let registry = Arc::new(DocumentRegistry::new(writer, config.replica.eviction_grace()));

    let platform = Arc::new(KubePlatform::new(
        config.platform.api_url.clone(),
        platform_token(&config.platform),
    ));
    let provisioner = Arc::new(ContainerProvisioner::new(
        platform,
        ProvisionSettings::from_config(&config.kernels),
    ));
    let orchestrator = Arc::new(KernelOrchestrator::new(
        registry.clone(),
        provisioner,
        Arc::new(ZmqConnector),
        store.clone(),
        WireCodec::new(&config.kernels.signing_key),
        OrchestratorSettings::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    let recycler =
        Arc::new(Recycler::new(orchestrator.clone()).with_sweep_interval(config.kernels.sweep_interval()));
    let recycler_task = tokio::spawn(recycler.run(shutdown.child_token()));

    let access = Arc::new(MetadataAccessControl::new(store.clone(), config.read_only));
    let state = Arc::new(AppState::new(
        registry.clone(),
        orchestrator.clone(),
        access,
        store,
    ));
    let server = ApiServer::new(
        ServerConfig::new(config.server.host.clone(), config.server.port),
        state,
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    info!("cellsync ready on http://{}", server.addr());
    let served = server.run(shutdown.clone()).await;
    shutdown.cancel();

    info!("Shutting down...");
    if let Err(e) = recycler_task.await {
        warn!("Recycler task ended abnormally: {}", e);
    }
    orchestrator.shutdown().await;
    registry.shutdown().await;
    info!("Shutdown complete");

    served
}
