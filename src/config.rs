use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::warehouse::TableRef;

const PROJECT_PLACEHOLDER: &str = "your-gcp-project-id";
const DATASET_PLACEHOLDER: &str = "your_bigquery_dataset_id";
const TABLE_PLACEHOLDER: &str = "your_bigquery_table_id";
const API_KEY_PLACEHOLDER: &str = "YOUR_ALPHA_VANTAGE_API_KEY";

/// How much history Alpha Vantage returns per request.
///
/// `Compact` is the latest 100 trading days, `Full` is the whole history.
/// The date range is always applied after download, so `Full` is needed for
/// any range reaching further back than ~5 months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputSize {
    Compact,
    Full,
}

impl OutputSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSize::Compact => "compact",
            OutputSize::Full => "full",
        }
    }
}

/// Runtime settings for a single load.
///
/// Every field can be given as a flag or through the environment (a `.env`
/// file is loaded before parsing).
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stock_loader",
    version,
    args_override_self = true,
    about = "Load daily adjusted stock prices from Alpha Vantage into BigQuery"
)]
pub struct Config {
    /// Google Cloud project that owns the dataset
    #[arg(long, env = "GCP_PROJECT_ID")]
    pub project_id: String,

    /// BigQuery dataset holding the destination table
    #[arg(long, env = "BIGQUERY_DATASET_ID", default_value = "trading_dashboard")]
    pub dataset_id: String,

    /// Destination table, created on first run
    #[arg(long, env = "BIGQUERY_TABLE_ID", default_value = "historic_data")]
    pub table_id: String,

    /// Alpha Vantage API key
    #[arg(long, env = "ALPHA_VANTAGE_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Comma separated ticker symbols
    #[arg(
        long,
        env = "TICKERS",
        value_delimiter = ',',
        default_value = "AAPL,MSFT,GOOGL,AMZN"
    )]
    pub tickers: Vec<String>,

    /// First trading day to keep (inclusive, YYYY-MM-DD)
    #[arg(long, env = "START_DATE", default_value = "2022-01-01")]
    pub start_date: NaiveDate,

    /// Last trading day to keep (inclusive, YYYY-MM-DD)
    #[arg(long, env = "END_DATE", default_value = "2023-12-31")]
    pub end_date: NaiveDate,

    #[arg(
        long,
        env = "ALPHA_VANTAGE_OUTPUT_SIZE",
        value_enum,
        default_value_t = OutputSize::Full
    )]
    pub output_size: OutputSize,

    /// Service account key file used to authenticate against BigQuery
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Pre-issued OAuth access token, used instead of a service account key
    #[arg(long, env = "BIGQUERY_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(
        long,
        env = "ALPHA_VANTAGE_URL",
        default_value = "https://www.alphavantage.co"
    )]
    pub alpha_vantage_url: String,

    #[arg(
        long,
        env = "BIGQUERY_URL",
        default_value = "https://bigquery.googleapis.com"
    )]
    pub bigquery_url: String,

    /// Delay between load job status checks, in milliseconds
    #[arg(long, env = "BIGQUERY_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not set; update it with your actual {what}")]
    Missing { name: &'static str, what: &'static str },
    #[error("{name} still holds the placeholder value '{value}'")]
    Placeholder { name: &'static str, value: String },
    #[error("no ticker symbols configured")]
    NoTickers,
    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error(
        "no BigQuery credentials: set GOOGLE_APPLICATION_CREDENTIALS or BIGQUERY_ACCESS_TOKEN"
    )]
    NoCredentials,
}

fn check_setting(
    value: &str,
    name: &'static str,
    what: &'static str,
    placeholder: &str,
) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing { name, what });
    }
    if value == placeholder {
        return Err(ConfigError::Placeholder {
            name,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl Config {
    /// Checks the settings before anything touches the network.
    ///
    /// Also trims ticker symbols and drops blank entries, so `"AAPL, MSFT,"`
    /// becomes `["AAPL", "MSFT"]`.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        check_setting(
            &self.project_id,
            "GCP_PROJECT_ID",
            "Google Cloud project ID",
            PROJECT_PLACEHOLDER,
        )?;
        check_setting(
            &self.dataset_id,
            "BIGQUERY_DATASET_ID",
            "BigQuery dataset ID",
            DATASET_PLACEHOLDER,
        )?;
        check_setting(
            &self.table_id,
            "BIGQUERY_TABLE_ID",
            "BigQuery table ID",
            TABLE_PLACEHOLDER,
        )?;
        check_setting(
            &self.api_key,
            "ALPHA_VANTAGE_API_KEY",
            "Alpha Vantage API key",
            API_KEY_PLACEHOLDER,
        )?;

        self.tickers = self
            .tickers
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if self.tickers.is_empty() {
            return Err(ConfigError::NoTickers);
        }

        if self.start_date > self.end_date {
            return Err(ConfigError::InvertedRange {
                start: self.start_date,
                end: self.end_date,
            });
        }

        let has_token = self
            .access_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if self.credentials.is_none() && !has_token {
            return Err(ConfigError::NoCredentials);
        }

        Ok(())
    }

    pub fn destination(&self) -> TableRef {
        TableRef::new(&self.project_id, &self.dataset_id, &self.table_id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};

    // Parses flags only, so variables exported in the shell or `.env` cannot
    // leak into the result.
    fn try_parse_isolated(args: &[&str]) -> Result<Config, clap::Error> {
        let matches = Config::command()
            .mut_args(|arg| arg.env(None::<&'static str>))
            .try_get_matches_from(args)?;
        Config::from_arg_matches(&matches)
    }

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec![
            "stock_loader",
            "--project-id",
            "ml-project",
            "--api-key",
            "KEY123",
            "--access-token",
            "ya29.token",
        ];
        args.extend_from_slice(extra);
        try_parse_isolated(&args).unwrap()
    }

    #[test]
    fn test_default_range_and_destination() {
        let config = parse(&[]);
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert_eq!(config.end_date, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
        assert_eq!(config.output_size, OutputSize::Full);
        assert_eq!(config.tickers, vec!["AAPL", "MSFT", "GOOGL", "AMZN"]);
        assert!(config.credentials.is_none());
        assert_eq!(
            config.destination().to_string(),
            "trading_dashboard.historic_data"
        );
    }

    #[test]
    fn test_exported_variables_do_not_change_defaults() {
        std::env::set_var("START_DATE", "2020-01-01");
        std::env::set_var("TICKERS", "X");

        let config = parse(&[]);

        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert_eq!(config.tickers, vec!["AAPL", "MSFT", "GOOGL", "AMZN"]);
    }

    #[test]
    fn test_tickers_are_split_and_trimmed() {
        let mut config = parse(&["--tickers", "AAPL, MSFT,,NVDA"]);
        config.validate().unwrap();
        assert_eq!(config.tickers, vec!["AAPL", "MSFT", "NVDA"]);
    }

    #[test]
    fn test_placeholder_values_are_rejected() {
        let mut config = parse(&["--project-id", "your-gcp-project-id"]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Placeholder {
                name: "GCP_PROJECT_ID",
                value: "your-gcp-project-id".to_string()
            })
        );

        let mut config = parse(&["--api-key", "YOUR_ALPHA_VANTAGE_API_KEY"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Placeholder { name: "ALPHA_VANTAGE_API_KEY", .. })
        ));

        let mut config = parse(&["--table-id", ""]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing { name: "BIGQUERY_TABLE_ID", .. })
        ));
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let mut config = parse(&["--start-date", "2024-01-01", "--end-date", "2023-01-01"]);
        assert!(matches!(config.validate(), Err(ConfigError::InvertedRange { .. })));
    }

    #[test]
    fn test_credentials_required() {
        let mut config = parse(&["--access-token", "  "]);
        assert_eq!(config.validate(), Err(ConfigError::NoCredentials));
    }

    #[test]
    fn test_invalid_date_fails_to_parse() {
        let result = try_parse_isolated(&[
            "stock_loader",
            "--project-id",
            "p",
            "--api-key",
            "k",
            "--start-date",
            "2022-13-01",
        ]);
        assert!(result.is_err());
    }
}
