use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::data::{column_names, PriceSource, StockRecord};
use crate::warehouse::{TableRef, Warehouse};

const PREVIEW_ROWS: usize = 50;

/// What a run needs to know, independent of where it came from.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub destination: TableRef,
    pub tickers: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Outcome of a run.
///
/// # Fields
/// * `fetched`: Rows kept per ticker, in configured order (zero when the
///   ticker had no data inside the range)
/// * `failed`: Tickers whose download or parsing failed
/// * `uploaded`: Rows written to the warehouse; zero if the load failed
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadSummary {
    pub fetched: Vec<(String, usize)>,
    pub failed: Vec<String>,
    pub uploaded: usize,
}

impl LoadSummary {
    pub fn total_fetched(&self) -> usize {
        self.fetched.iter().map(|(_, rows)| rows).sum()
    }
}

/// Ensures the table, downloads every ticker, then appends everything in a
/// single load job.
///
/// A ticker that fails is logged and skipped. A failed upload is logged and
/// reported as zero rows uploaded. Only a failure to ensure the table aborts
/// the run.
pub async fn run<S, W>(source: &S, warehouse: &W, plan: &LoadPlan) -> Result<LoadSummary>
where
    S: PriceSource + Sync,
    W: Warehouse + Sync,
{
    warehouse
        .ensure_table(&plan.destination)
        .await
        .with_context(|| format!("could not prepare table {}", plan.destination.qualified()))?;

    let mut summary = LoadSummary::default();
    let mut all_records: Vec<StockRecord> = Vec::new();

    for ticker in &plan.tickers {
        match source
            .fetch_daily_adjusted(ticker, plan.start_date, plan.end_date)
            .await
        {
            Ok(records) if records.is_empty() => {
                warn!(
                    "No data found for {} within the specified date range ({} to {}).",
                    ticker, plan.start_date, plan.end_date
                );
                summary.fetched.push((ticker.clone(), 0));
            }
            Ok(records) => {
                info!("Downloaded {} rows for {}", records.len(), ticker);
                summary.fetched.push((ticker.clone(), records.len()));
                all_records.extend(records);
            }
            Err(e) => {
                warn!("Skipping {}: {}", ticker, e);
                summary.failed.push(ticker.clone());
            }
        }
    }

    if all_records.is_empty() {
        warn!("No data was successfully downloaded for any ticker.");
        return Ok(summary);
    }

    log_preview(&all_records);

    match warehouse.append_rows(&plan.destination, &all_records).await {
        Ok(rows) => summary.uploaded = rows,
        Err(e) => error!("Error uploading data to BigQuery: {:#}", e),
    }

    Ok(summary)
}

fn log_preview(records: &[StockRecord]) {
    info!("Collected {} rows", records.len());
    info!("Columns: {}", column_names().join(", "));
    for record in records.iter().take(PREVIEW_ROWS) {
        info!(
            "{} {:<6} open={:?} high={:?} low={:?} close={:?} adj_close={:?} volume={:?}",
            record.date,
            record.ticker,
            record.open,
            record.high,
            record.low,
            record.close,
            record.adj_close,
            record.volume
        );
    }
}
