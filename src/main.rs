/// Coordinate resolution and ephemeris generation server
mod clients;
mod config;
mod domain;
mod errors;
mod handlers;
mod protocol;
mod repo;
mod routes;
mod services;
mod utils;

use crate::clients::{HorizonsClient, SimbadClient};
use crate::config::AppConfig;
use crate::handlers::serve;
use crate::repo::FileGenerator;
use crate::services::sampler::EphemerisSampler;
use crate::services::ResolutionService;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load configuration
    let config = AppConfig::from_env()?;
    info!("Configuration loaded successfully");

    tokio::fs::create_dir_all(&config.output_dir).await?;
    info!("Writing ephemerides to {}", config.output_dir.display());

    // Initialize catalogue clients
    let simbad = Arc::new(SimbadClient::new(
        config.simbad_url.clone(),
        config.lookup_timeout,
    )?);
    let horizons = Arc::new(HorizonsClient::new(
        config.horizons.clone(),
        config.lookup_timeout,
    )?);

    // Initialize services
    let sampler = EphemerisSampler::new(
        simbad,
        horizons,
        config.lookup_timeout,
        config.sampling.tolerance_seconds,
    );
    let generator = Arc::new(FileGenerator::new(
        config.output_dir.clone(),
        config.sampling.clone(),
        config.observer,
    ));
    let service = Arc::new(ResolutionService::new(sampler, generator, config.sso_flag));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("rust_ephem service listening on {}", config.bind_addr);

    serve(listener, service).await?;

    Ok(())
}
