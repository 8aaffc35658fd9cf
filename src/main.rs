pub mod cache;
pub mod config;
pub mod data;
pub mod heat;
pub mod lifecycle;
pub mod matching;
pub mod render;
pub mod resolver;
pub mod server;
pub mod types;

use anyhow::{bail, Context};
use cache::LayerCache;
use clap::{Parser, Subcommand};
use data::DatasetLoader;
use resolver::ResolverInputs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every project to a coordinate and print the heat points as JSON
    Resolve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Write the JSON here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Serve layer status, heat points and rendered heat tiles
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // Cancelled on Ctrl-C; late layer loads are discarded instead of applied.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received");
                cancel.cancel();
            }
        });
    }

    match &cli.command {
        Commands::Resolve { config, output } => {
            info!("Resolving projects with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let loader = build_loader(&app_config)?;
            let projects = data::load_projects(&app_config.input.projects_csv)?;
            let locations = data::load_locations(&app_config.input.locations_csv)?;

            let Some(report) = loader.load_all(&cancel).await else {
                bail!("Interrupted while loading boundary layers");
            };
            if report.all_failed() {
                warn!("No boundary layer could be loaded; every project will be unresolved");
            }

            let inputs = ResolverInputs {
                layers: &report.layers,
                locations: &locations,
            };
            let agg = heat::aggregate(&projects, &inputs);
            info!(
                "Resolved {} projects, {} unresolved",
                agg.resolved, agg.unresolved
            );

            let json = serde_json::to_string_pretty(&agg)?;
            match output {
                Some(path) => std::fs::write(path, json)
                    .with_context(|| format!("Failed to write {:?}", path))?,
                None => println!("{}", json),
            }
        }
        Commands::Serve { config } => {
            info!("Serving with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let loader = build_loader(&app_config)?;
            let projects = data::load_projects(&app_config.input.projects_csv)?;
            let locations = data::load_locations(&app_config.input.locations_csv)?;

            server::start_server(app_config, loader, projects, locations, cancel).await?;
        }
    }

    Ok(())
}

fn build_loader(config: &config::AppConfig) -> anyhow::Result<DatasetLoader> {
    let source = config.dataset_source()?;
    Ok(DatasetLoader::new(source, Arc::new(LayerCache::new()), config.ttl()))
}
