use super::processing::{reshape_daily_series, StockRecord};
use crate::config::OutputSize;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

const DAILY_ADJUSTED_FUNCTION: &str = "TIME_SERIES_DAILY_ADJUSTED";
const TIME_SERIES_KEY: &str = "Time Series (Daily)";

/// Reasons a single ticker's download can fail.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("request to Alpha Vantage failed: {0}")]
    Http(reqwest::Error),
    #[error("Alpha Vantage API error: {0}")]
    Api(String),
    #[error("Alpha Vantage rate limit: {0}")]
    RateLimited(String),
    #[error("Alpha Vantage information: {0}")]
    Information(String),
    #[error("no daily time series data in response")]
    MissingTimeSeries,
    #[error("malformed Alpha Vantage payload: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for IngestionError {
    // The request URL carries the API key, keep it out of messages.
    fn from(e: reqwest::Error) -> Self {
        IngestionError::Http(e.without_url())
    }
}

/// A source of daily price rows for one ticker at a time.
#[async_trait]
pub trait PriceSource {
    async fn fetch_daily_adjusted(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StockRecord>, IngestionError>;
}

/// Downloads daily adjusted time series from the Alpha Vantage API.
///
/// One request per ticker; the provider returns the whole series (or the
/// latest 100 days with `OutputSize::Compact`) and the date range is applied
/// locally.
pub struct DataIngestion {
    api_key: String,
    base_url: String,
    output_size: OutputSize,
    client: reqwest::Client,
}

impl DataIngestion {
    /// Creates a new `DataIngestion` instance.
    ///
    /// # Arguments
    /// * `api_key`: Alpha Vantage API key
    /// * `base_url`: API root, normally `https://www.alphavantage.co`
    /// * `output_size`: `compact` or `full` history
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        output_size: OutputSize,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            output_size,
            client: reqwest::Client::new(),
        }
    }

    async fn request_series(&self, ticker: &str) -> Result<Value, IngestionError> {
        let url = format!("{}/query", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("function", DAILY_ADJUSTED_FUNCTION),
                ("symbol", ticker),
                ("outputsize", self.output_size.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| IngestionError::InvalidPayload(format!("response is not JSON: {}", e)))
    }
}

/// Pulls the time series object out of a decoded response, turning the
/// provider's in-band error payloads into errors.
pub fn extract_time_series(
    response: &Value,
) -> Result<&serde_json::Map<String, Value>, IngestionError> {
    if let Some(message) = response.get("Error Message") {
        return Err(IngestionError::Api(
            message.as_str().unwrap_or("Unknown error").to_string(),
        ));
    }

    match response.get(TIME_SERIES_KEY) {
        Some(series) => {
            if let Some(note) = response.get("Note").and_then(Value::as_str) {
                warn!("Alpha Vantage API note: {}", note);
            }
            series.as_object().ok_or(IngestionError::MissingTimeSeries)
        }
        None => {
            if let Some(note) = response.get("Note") {
                return Err(IngestionError::RateLimited(
                    note.as_str().unwrap_or("Unknown rate limit message").to_string(),
                ));
            }
            if let Some(info) = response.get("Information") {
                return Err(IngestionError::Information(
                    info.as_str().unwrap_or("Unknown information message").to_string(),
                ));
            }
            Err(IngestionError::MissingTimeSeries)
        }
    }
}

#[async_trait]
impl PriceSource for DataIngestion {
    async fn fetch_daily_adjusted(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StockRecord>, IngestionError> {
        info!("Downloading data for {} from Alpha Vantage", ticker);

        let response = self.request_series(ticker).await?;
        let time_series = extract_time_series(&response)?;
        debug!("{} returned {} daily entries", ticker, time_series.len());

        reshape_daily_series(time_series, ticker, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn range() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
        )
    }

    fn daily_body() -> String {
        json!({
            "Meta Data": {
                "1. Information": "Daily Time Series with Splits and Dividend Events",
                "2. Symbol": "IBM"
            },
            "Time Series (Daily)": {
                "2024-01-02": {
                    "1. open": "162.83", "2. high": "163.29", "3. low": "160.0",
                    "4. close": "161.5", "5. adjusted close": "156.2",
                    "6. volume": "4383604", "7. dividend amount": "0.0000",
                    "8. split coefficient": "1.0"
                },
                "2023-12-29": {
                    "1. open": "162.6", "2. high": "163.42", "3. low": "161.87",
                    "4. close": "163.55", "5. adjusted close": "158.2",
                    "6. volume": "3001632", "7. dividend amount": "0.0000",
                    "8. split coefficient": "1.0"
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_fetch_daily_adjusted_sends_query_and_reshapes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("function".into(), "TIME_SERIES_DAILY_ADJUSTED".into()),
                Matcher::UrlEncoded("symbol".into(), "IBM".into()),
                Matcher::UrlEncoded("outputsize".into(), "full".into()),
                Matcher::UrlEncoded("apikey".into(), "demo".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(daily_body())
            .create_async()
            .await;

        let ingestion = DataIngestion::new("demo", server.url(), OutputSize::Full);
        let (start, end) = range();
        let records = ingestion.fetch_daily_adjusted("IBM", start, end).await.unwrap();

        mock.assert_async().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ticker, "IBM");
        assert_eq!(records[0].close, Some(163.55));
        assert_eq!(records[0].volume, Some(3001632));
    }

    #[tokio::test]
    async fn test_api_error_message_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"Error Message": "Invalid API call."}"#)
            .create_async()
            .await;

        let ingestion = DataIngestion::new("demo", server.url(), OutputSize::Compact);
        let (start, end) = range();
        let result = ingestion.fetch_daily_adjusted("NOPE", start, end).await;

        match result {
            Err(IngestionError::Api(message)) => assert_eq!(message, "Invalid API call."),
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_status_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let ingestion = DataIngestion::new("demo", server.url(), OutputSize::Full);
        let (start, end) = range();
        let result = ingestion.fetch_daily_adjusted("IBM", start, end).await;

        assert!(matches!(result, Err(IngestionError::Http(_))));
    }

    #[tokio::test]
    async fn test_http_error_does_not_reveal_api_key() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let ingestion = DataIngestion::new("SECRETKEY123", server.url(), OutputSize::Full);
        let (start, end) = range();
        let err = ingestion
            .fetch_daily_adjusted("IBM", start, end)
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("503"), "unexpected message: {}", message);
        assert!(!message.contains("SECRETKEY123"));
        assert!(!format!("{:?}", err).contains("SECRETKEY123"));
    }

    #[test]
    fn test_rate_limit_note_without_series() {
        let response = json!({ "Note": "Thank you for using Alpha Vantage! 5 calls per minute." });
        assert!(matches!(
            extract_time_series(&response),
            Err(IngestionError::RateLimited(_))
        ));
    }

    #[test]
    fn test_information_without_series() {
        let response = json!({ "Information": "This is a premium endpoint." });
        assert!(matches!(
            extract_time_series(&response),
            Err(IngestionError::Information(_))
        ));
    }

    #[test]
    fn test_missing_time_series() {
        let response = json!({ "Meta Data": {} });
        assert!(matches!(
            extract_time_series(&response),
            Err(IngestionError::MissingTimeSeries)
        ));

        let response = json!({ "Time Series (Daily)": [] });
        assert!(matches!(
            extract_time_series(&response),
            Err(IngestionError::MissingTimeSeries)
        ));
    }

    #[test]
    fn test_note_alongside_series_is_not_an_error() {
        let response = json!({
            "Note": "heads up",
            "Time Series (Daily)": { "2023-01-03": { "4. close": "1.0" } }
        });
        assert_eq!(extract_time_series(&response).unwrap().len(), 1);
    }
}
