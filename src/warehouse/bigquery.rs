use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::auth::Authenticator;
use super::schema::{price_table_schema, to_ndjson, TableRef, TableSchema};
use super::Warehouse;
use crate::data::StockRecord;

const MULTIPART_BOUNDARY: &str = "stock_loader_7d1f3a9c0b2e";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// BigQuery REST v2 client covering the three calls a load needs: table
/// lookup, table creation and a multipart load job.
pub struct BigQueryClient {
    base_url: String,
    auth: Authenticator,
    poll_interval: Duration,
    client: reqwest::Client,
}

impl BigQueryClient {
    pub fn new(base_url: impl Into<String>, auth: Authenticator, poll_interval: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            poll_interval,
            client: reqwest::Client::new(),
        }
    }

    /// Appends percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid BigQuery URL {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("BigQuery URL {} cannot take a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn table_url(&self, table: &TableRef) -> Result<Url> {
        self.endpoint(&[
            "bigquery",
            "v2",
            "projects",
            &table.project_id,
            "datasets",
            &table.dataset_id,
            "tables",
            &table.table_id,
        ])
    }

    /// Returns `false` only for a 404; any other failure is an error.
    pub async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let token = self.auth.bearer_token().await?;
        let response = self
            .client
            .get(self.table_url(table)?)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("failed to look up table {}", table))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(api_error(response, "table lookup").await),
        }
    }

    pub async fn create_table(&self, table: &TableRef, schema: &TableSchema) -> Result<()> {
        let token = self.auth.bearer_token().await?;
        let url = self.endpoint(&[
            "bigquery",
            "v2",
            "projects",
            &table.project_id,
            "datasets",
            &table.dataset_id,
            "tables",
        ])?;

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({
                "tableReference": table,
                "schema": schema,
            }))
            .send()
            .await
            .with_context(|| format!("failed to create table {}", table))?;

        if !response.status().is_success() {
            return Err(api_error(response, "table creation").await);
        }
        Ok(())
    }

    async fn submit_load_job(&self, table: &TableRef, records: &[StockRecord]) -> Result<Job> {
        let token = self.auth.bearer_token().await?;
        let url = self.endpoint(&[
            "upload",
            "bigquery",
            "v2",
            "projects",
            &table.project_id,
            "jobs",
        ])?;

        let configuration = json!({
            "configuration": {
                "load": {
                    "destinationTable": table,
                    "schema": price_table_schema(),
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": "WRITE_APPEND",
                }
            }
        });
        let body = multipart_related(&configuration.to_string(), &to_ndjson(records)?);

        let response = self
            .client
            .post(url)
            .query(&[("uploadType", "multipart")])
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(body)
            .send()
            .await
            .context("failed to submit load job")?;

        if !response.status().is_success() {
            return Err(api_error(response, "load job submission").await);
        }
        response.json().await.context("failed to parse load job response")
    }

    async fn get_job(&self, reference: &JobReference) -> Result<Job> {
        let token = self.auth.bearer_token().await?;
        let url = self.endpoint(&[
            "bigquery",
            "v2",
            "projects",
            &reference.project_id,
            "jobs",
            &reference.job_id,
        ])?;

        let mut request = self.client.get(url).bearer_auth(token);
        if let Some(location) = &reference.location {
            request = request.query(&[("location", location)]);
        }

        let response = request.send().await.context("failed to poll load job")?;
        if !response.status().is_success() {
            return Err(api_error(response, "load job status").await);
        }
        response.json().await.context("failed to parse load job status")
    }

    /// Blocks until the job reaches `DONE`, then surfaces `errorResult`.
    async fn wait_for_job(&self, mut job: Job) -> Result<()> {
        loop {
            if job.status.state == "DONE" {
                if let Some(error) = &job.status.error_result {
                    let details: Vec<&str> =
                        job.status.errors.iter().map(|e| e.message.as_str()).collect();
                    bail!(
                        "load job {} failed: {} ({}){}",
                        job.job_reference.job_id,
                        error.message,
                        error.reason,
                        if details.is_empty() {
                            String::new()
                        } else {
                            format!("; {}", details.join("; "))
                        }
                    );
                }
                return Ok(());
            }

            debug!(
                "Load job {} is {}, checking again in {:?}",
                job.job_reference.job_id, job.status.state, self.poll_interval
            );
            tokio::time::sleep(self.poll_interval).await;
            job = self.get_job(&job.job_reference).await?;
        }
    }
}

fn multipart_related(metadata: &str, data: &str) -> String {
    format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
         --{b}\r\nContent-Type: application/octet-stream\r\n\r\n{data}\r\n--{b}--\r\n",
        b = MULTIPART_BOUNDARY,
    )
}

async fn api_error(response: Response, action: &str) -> anyhow::Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => anyhow!("BigQuery {} failed: {} - {}", action, status, parsed.error.message),
        Err(_) => anyhow!("BigQuery {} failed: {} - {}", action, status, body),
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn ensure_table(&self, table: &TableRef) -> Result<()> {
        if self.table_exists(table).await? {
            info!("Table {} already exists.", table);
            return Ok(());
        }

        info!("Table {} not found. Creating table.", table);
        self.create_table(table, &price_table_schema()).await?;
        info!("Created table {}", table);
        Ok(())
    }

    async fn append_rows(&self, table: &TableRef, records: &[StockRecord]) -> Result<usize> {
        if records.is_empty() {
            info!("No data to upload to BigQuery.");
            return Ok(0);
        }

        info!("Uploading {} rows to BigQuery...", records.len());
        let job = self.submit_load_job(table, records).await?;
        debug!("Submitted load job {}", job.job_reference.job_id);
        self.wait_for_job(job).await?;

        info!("Successfully uploaded {} rows to {}.", records.len(), table);
        Ok(records.len())
    }
}
