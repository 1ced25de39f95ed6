pub mod ingestion;
pub mod processing;

pub use ingestion::{DataIngestion, PriceSource};
pub use processing::{column_names, StockRecord};
