//! Buffer Zones - refresh and serve buffer zone map data.
//!
//! # Commands
//!
//! - `bufferzones refresh` (default) - Run the pipeline once and exit
//! - `bufferzones serve` - Serve `GET /latest`, `GET /health` and `GET /styles`
//!
//! Every option can also be set through a `BUFFERZONES_*` environment
//! variable; see `bufferzones --help`.

use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use bufferzones::api::{AppState, router};
use bufferzones::cli::{Cli, Commands};
use bufferzones::pipeline::Pipeline;
use bufferzones::publisher::PublishOutcome;
use bufferzones::storage::PublicationLog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("bufferzones=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline.into_config()?;

    match cli.command.unwrap_or(Commands::Refresh) {
        Commands::Refresh => {
            info!(
                sources = config.sources.len(),
                output_dir = %config.output.output_dir.display(),
                "Starting refresh"
            );

            let pipeline = Pipeline::new(config).await?;
            let report = pipeline.run().await?;

            match &report.outcome {
                PublishOutcome::Published(record) => info!(
                    id = record.id,
                    features = report.features,
                    failed_sources = report.source_failures.len(),
                    "Refresh complete, new snapshot published"
                ),
                PublishOutcome::NoChange => info!(
                    features = report.features,
                    failed_sources = report.source_failures.len(),
                    "Refresh complete, snapshot unchanged"
                ),
            }

            pipeline.log().close().await;
        }
        Commands::Serve { port } => {
            tokio::fs::create_dir_all(&config.output.output_dir).await?;
            let database_url = config.output.database_url();
            let log = PublicationLog::new(&database_url).await?;
            info!(db_url = %database_url, "Publication log opened");

            let state = AppState {
                latest_path: config.output.latest_path(),
                log,
            };

            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = TcpListener::bind(addr).await?;
            info!(%addr, "Buffer Zones is listening");

            axum::serve(listener, router(state)).await?;
        }
    }

    Ok(())
}
