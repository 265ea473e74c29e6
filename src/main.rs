//! Market telemetry pipeline daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!     upstream ws ──▶ net::ConnectionManager ──▶ ingest queues (per channel)
//!                                                      │
//!                                                      ▼
//!                                    ingest::BatchProcessor ──▶ compression
//!                                                      │
//!                                                      ▼
//!                                    Dispatcher ──▶ observers (market metrics, ...)
//!                                                      │
//!     monitors (memory, cpu, network, pause) ─────────▶ alerts::AlertEngine ──▶ sinks
//!
//!     admin (axum): /health /metrics /admin/*
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use telemetry_pipeline::admin::{setup_admin_router, AdminState};
use telemetry_pipeline::config::{load_config, TelemetryConfig};
use telemetry_pipeline::net::WsConnector;
use telemetry_pipeline::observability::logging::init_logging;
use telemetry_pipeline::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "telemetry-pipeline")]
#[command(about = "Real-time market telemetry ingestion and monitoring", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when it does not exist.
    #[arg(short, long, default_value = "telemetry.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = if args.config.exists() {
        load_config(&args.config)?
    } else {
        TelemetryConfig::default()
    };
    init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        url = %config.connection.url,
        batch_size = config.batching.message_batch_size,
        queue_size = config.batching.message_queue_size,
        "telemetry-pipeline starting"
    );

    let connector = Arc::new(WsConnector::new(config.connection.connect_timeout()));
    let pipeline = Arc::new(Pipeline::builder(config).build());
    pipeline.start(connector)?;

    let observability = &pipeline.config().observability;
    if observability.metrics_enabled {
        let listener = TcpListener::bind(&observability.metrics_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin endpoint listening");
        let router = setup_admin_router(AdminState::new(Arc::clone(&pipeline)));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Admin endpoint failed");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received SIGINT, shutting down");

    let report = pipeline.stop().await;
    tracing::info!(joined = report.joined, aborted = report.aborted, "Shutdown complete");
    Ok(())
}
