mod config;
mod data;
mod pipeline;
mod warehouse;

use clap::Parser;
use config::Config;
use data::DataIngestion;
use dotenv::dotenv;
use pipeline::LoadPlan;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warehouse::{Authenticator, BigQueryClient};

/// Entry point for the Alpha Vantage to BigQuery loader.
///
/// # Workflow Steps
/// - Load environment variables from `.env` and parse the configuration
/// - Reject missing or placeholder settings before touching the network
/// - Ensure the destination table exists, creating it with the price schema
/// - Download daily adjusted prices for each ticker in turn
/// - Append all collected rows in one load job and wait for it to finish
///
/// # Returns
/// Returns an error if the configuration is invalid, credentials cannot be
/// loaded, or the destination table cannot be checked or created. Per-ticker
/// and upload failures are logged and do not fail the run.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::parse();
    config.validate()?;

    let auth = Authenticator::from_settings(
        config.credentials.as_deref(),
        config.access_token.as_deref(),
    )?;
    let warehouse = BigQueryClient::new(&config.bigquery_url, auth, config.poll_interval());
    let ingestion = DataIngestion::new(
        &config.api_key,
        &config.alpha_vantage_url,
        config.output_size,
    );

    let plan = LoadPlan {
        destination: config.destination(),
        tickers: config.tickers.clone(),
        start_date: config.start_date,
        end_date: config.end_date,
    };

    info!(
        "Loading {} tickers ({} to {}) into {}",
        plan.tickers.len(),
        plan.start_date,
        plan.end_date,
        plan.destination.qualified()
    );

    let summary = pipeline::run(&ingestion, &warehouse, &plan).await?;

    info!(
        "Done: {} rows fetched, {} uploaded, {} tickers failed",
        summary.total_fetched(),
        summary.uploaded,
        summary.failed.len()
    );

    Ok(())
}
