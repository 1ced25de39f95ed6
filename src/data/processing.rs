use super::ingestion::IngestionError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column names in warehouse schema order.
pub const COLUMNS: [&str; 8] = [
    "Date", "Open", "High", "Low", "Close", "Adj_Close", "Volume", "Ticker",
];

/// One trading day for one ticker, shaped for the warehouse table.
///
/// Price fields are `None` when the provider sent something that is not a
/// finite number; the warehouse columns are nullable.
///
/// # Fields
/// * `date`: The trading day
/// * `open`, `high`, `low`, `close`: Raw daily prices
/// * `adj_close`: Close adjusted for splits and dividends
/// * `volume`: Shares traded
/// * `ticker`: The symbol the row belongs to
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StockRecord {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Open")]
    pub open: Option<f64>,
    #[serde(rename = "High")]
    pub high: Option<f64>,
    #[serde(rename = "Low")]
    pub low: Option<f64>,
    #[serde(rename = "Close")]
    pub close: Option<f64>,
    #[serde(rename = "Adj_Close")]
    pub adj_close: Option<f64>,
    #[serde(rename = "Volume")]
    pub volume: Option<i64>,
    #[serde(rename = "Ticker")]
    pub ticker: String,
}

pub fn column_names() -> &'static [&'static str] {
    &COLUMNS
}

/// Reshapes an Alpha Vantage `Time Series (Daily)` object into records.
///
/// Keeps only the days inside `[start, end]`, attaches `ticker` to every row
/// and returns them oldest first. Dividend amount and split coefficient are
/// ignored.
///
/// # Arguments
/// * `time_series`: The object keyed by `YYYY-MM-DD`
/// * `ticker`: Symbol written into the `Ticker` column
/// * `start`: First day to keep (inclusive)
/// * `end`: Last day to keep (inclusive)
///
/// # Errors
/// Returns `IngestionError::InvalidPayload` if a date key does not parse or a
/// day entry is not an object. Unparseable numbers are not errors.
pub fn reshape_daily_series(
    time_series: &Map<String, Value>,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<StockRecord>, IngestionError> {
    let mut records = Vec::new();

    for (date_str, day) in time_series {
        let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|e| {
            IngestionError::InvalidPayload(format!("invalid date key '{}': {}", date_str, e))
        })?;

        if date < start || date > end {
            continue;
        }

        let day = day.as_object().ok_or_else(|| {
            IngestionError::InvalidPayload(format!("entry for {} is not an object", date_str))
        })?;

        records.push(StockRecord {
            date,
            open: coerce_float(day.get("1. open")),
            high: coerce_float(day.get("2. high")),
            low: coerce_float(day.get("3. low")),
            close: coerce_float(day.get("4. close")),
            adj_close: coerce_float(day.get("5. adjusted close")),
            volume: coerce_integer(day.get("6. volume")),
            ticker: ticker.to_string(),
        });
    }

    records.sort_by(|a, b| a.date.cmp(&b.date));

    Ok(records)
}

// Alpha Vantage sends numbers as strings, but accept real numbers too.
fn coerce_float(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

fn coerce_integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| integral(s.parse::<f64>().ok()?))
        }
        Value::Number(n) => n.as_i64().or_else(|| integral(n.as_f64()?)),
        _ => None,
    }
}

fn integral(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64)
        .then_some(value as i64)
}
