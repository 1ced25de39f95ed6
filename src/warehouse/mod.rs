pub mod auth;
pub mod bigquery;
pub mod schema;

use anyhow::Result;
use async_trait::async_trait;

use crate::data::StockRecord;

pub use auth::Authenticator;
pub use bigquery::BigQueryClient;
pub use schema::TableRef;

/// Destination for downloaded rows.
#[async_trait]
pub trait Warehouse {
    /// Creates the table with the price schema unless it already exists.
    async fn ensure_table(&self, table: &TableRef) -> Result<()>;

    /// Appends rows and waits for the load to finish. Returns rows written.
    async fn append_rows(&self, table: &TableRef, records: &[StockRecord]) -> Result<usize>;
}
