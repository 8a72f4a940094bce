use anyhow::{Context, Result};
use profile_directory::api::{start_api_server, AppState};
use profile_directory::config::{Config, RendererBackend, StoreBackend};
use profile_directory::renderer::webdriver::spawn_driver;
use profile_directory::renderer::{FixtureRenderer, PageRenderer, SettlePolicy, WebDriverRenderer};
use profile_directory::store::memory::DEFAULT_PAGE_SIZE;
use profile_directory::store::{DynamoProfileStore, InMemoryProfileStore, ProfileStore};
use profile_directory::{DirectoryService, HandleValidator, IngestPipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Profile Directory Service"
    );

    // Initialize metrics
    if config.service.metrics_port != 0 {
        init_metrics(config.service.metrics_port)?;
    }

    // Initialize components
    let store = init_store(&config).await?;

    let validator = Arc::new(
        HandleValidator::new(&config.handle.pattern).context("Invalid handle pattern")?,
    );

    // Keeps a launched driver alive until shutdown
    let mut driver_process = None;
    let renderer: Arc<dyn PageRenderer> = match config.renderer.backend {
        RendererBackend::Webdriver => {
            if let Some(ref path) = config.renderer.driver_path {
                driver_process = Some(
                    spawn_driver(
                        path,
                        config.renderer.driver_port,
                        &config.renderer.driver_url,
                        Duration::from_secs(10),
                    )
                    .await?,
                );
            }

            let settle = SettlePolicy {
                timeout: config.settle_timeout(),
                poll_interval: config.poll_interval(),
            };
            Arc::new(
                WebDriverRenderer::new(&config.renderer, settle, config.driver_request_timeout())
                    .context("Failed to initialize WebDriver renderer")?,
            )
        }
        RendererBackend::Fixture => {
            let fixtures = FixtureRenderer::from_dir(&config.renderer.fixture_dir)
                .context("Failed to load recorded page snapshots")?;
            if fixtures.is_empty() {
                warn!(dir = %config.renderer.fixture_dir, "No recorded pages; every ingest will miss");
            }
            Arc::new(fixtures)
        }
    };

    let directory = Arc::new(DirectoryService::new(
        store.clone(),
        validator.clone(),
        &config.store.primary_key,
    ));

    let ingest = Arc::new(IngestPipeline::new(
        validator,
        renderer,
        store.clone(),
        &config.ingest.profile_url_template,
        config.ingest.refresh_policy,
    ));

    // Create API state
    let api_state = AppState {
        directory,
        ingest,
        store,
        path_parameter: Arc::from(config.api.path_parameter.as_str()),
    };

    info!(
        refresh_policy = ?config.ingest.refresh_policy,
        "Profile directory started successfully"
    );

    start_api_server(api_state, &config.api, shutdown_signal()).await?;

    info!("Shutting down profile directory");

    stop_driver(driver_process).await;

    info!("Profile directory stopped");

    Ok(())
}

async fn init_store(config: &Config) -> Result<Arc<dyn ProfileStore>> {
    let store: Arc<dyn ProfileStore> = match config.store.backend {
        StoreBackend::Dynamodb => Arc::new(
            DynamoProfileStore::new(&config.store)
                .await
                .context("Failed to initialize DynamoDB profile store")?,
        ),
        StoreBackend::Memory => {
            let page_size = config
                .store
                .page_size
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(DEFAULT_PAGE_SIZE);
            info!(page_size = page_size, "Using in-memory profile store");
            Arc::new(InMemoryProfileStore::new(&config.store.primary_key, page_size))
        }
    };

    Ok(store)
}

async fn stop_driver(driver: Option<Child>) {
    if let Some(mut child) = driver {
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to stop WebDriver process");
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
