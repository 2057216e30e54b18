use anyhow::{Context, Result};
use curator::config::Config;
use curator::pipeline::{self, Pipeline};
use curator::store;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    info!(service = %config.service.name, "Starting curator");

    config.validate().context("Invalid configuration")?;

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    let store = store::from_config(&config.store)
        .await
        .context("Failed to initialize object store")?;
    info!(store = %store.describe(), "Object store ready");

    let files = pipeline::discover(&config.catalog).context("Failed to discover catalogs")?;
    if files.is_empty() {
        warn!("No catalog files found");
        return Ok(());
    }

    let pipeline = Pipeline::new(&config, store).context("Failed to build pipeline")?;

    tokio::select! {
        result = pipeline.run(&files) => {
            let summary = result.context("Curation run failed")?;
            info!(
                rows_read = summary.rows_read,
                rows_accepted = summary.rows_accepted,
                uploaded = summary.uploaded,
                duplicates = summary.duplicates,
                filtered_out = summary.filtered_out,
                rejected = summary.rejected,
                failed = summary.failed,
                "Curator finished"
            );
        }
        _ = shutdown_signal() => {
            info!("Interrupted; completed files are kept and the run can be resumed");
        }
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
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
