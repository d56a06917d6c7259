//! HTTP fetch utilities and `people` table persistence for SWPL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use swpl_core::{Batch, PersistedRow, PEOPLE_COLUMNS, PEOPLE_TABLE};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "swpl-storage";

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;
const MAX_ROWS_PER_INSERT: usize = MAX_BIND_PARAMS / PEOPLE_COLUMNS.len();

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

/// Shared HTTP session. One client serves every concurrent fetch of a run.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::Request { url, .. }
            | FetchError::HttpStatus { url, .. }
            | FetchError::Decode { url, .. } => url,
        }
    }
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// GET `url` and return the body of a 2xx response.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|source| FetchError::Request {
                    url: url.to_string(),
                    source,
                })?;

            let status = resp.status();
            if !status.is_success() {
                return Err(http_status_error(status, url));
            }

            let body = resp.bytes().await.map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
            debug!(bytes = body.len(), "fetched");
            Ok(body.to_vec())
        }
        .instrument(span)
        .await
    }

    /// GET `url` and decode its JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let body = self.fetch_bytes(url).await?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

fn http_status_error(status: StatusCode, url: &str) -> FetchError {
    FetchError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("table {0} does not exist")]
    MissingTable(&'static str),
}

/// Persistence handle for the `people` table.
///
/// `insert_batch` is transactional: every row of the batch becomes visible
/// or none does.
#[async_trait]
pub trait PeopleStore: Send + Sync {
    /// Create the target table if it is absent. Safe to call repeatedly.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Insert every record of `batch` and commit. Returns the row count.
    async fn insert_batch(&self, batch: Batch) -> Result<usize, StoreError>;
}

pub fn create_table_sql() -> String {
    let columns = PEOPLE_COLUMNS
        .iter()
        .map(|column| format!("    {column} VARCHAR"))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "CREATE TABLE IF NOT EXISTS {PEOPLE_TABLE} (\n    id SERIAL PRIMARY KEY,\n{columns}\n)"
    )
}

#[derive(Debug, Clone)]
pub struct PgPeopleStore {
    pool: PgPool,
}

impl PgPeopleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl PeopleStore for PgPeopleStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(&create_table_sql()).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_batch(&self, batch: Batch) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for rows in batch.chunks(MAX_ROWS_PER_INSERT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {PEOPLE_TABLE} ({}) ",
                PEOPLE_COLUMNS.join(", ")
            ));
            builder.push_values(rows, |mut b, record| {
                for value in record.column_values() {
                    b.push_bind(value);
                }
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(rows = batch.len(), "batch committed");
        Ok(batch.len())
    }
}

/// In-process [`PeopleStore`] with the same contract as the Postgres one.
#[derive(Debug, Default)]
pub struct MemoryPeopleStore {
    schema_ready: AtomicBool,
    rows: Mutex<Vec<PersistedRow>>,
}

impl MemoryPeopleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of committed rows in commit order.
    pub async fn rows(&self) -> Vec<PersistedRow> {
        self.rows.lock().await.clone()
    }

    pub async fn row_count(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl PeopleStore for MemoryPeopleStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.schema_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_batch(&self, batch: Batch) -> Result<usize, StoreError> {
        if !self.schema_ready.load(Ordering::SeqCst) {
            return Err(StoreError::MissingTable(PEOPLE_TABLE));
        }

        let inserted = batch.len();
        let mut rows = self.rows.lock().await;
        let next_id = rows.len() as i64 + 1;
        rows.extend(
            batch
                .into_iter()
                .enumerate()
                .map(|(offset, record)| PersistedRow {
                    id: next_id + offset as i64,
                    record,
                }),
        );
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swpl_core::FlatRecord;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(name: &str) -> FlatRecord {
        FlatRecord {
            name: name.to_string(),
            height: "172".into(),
            homeworld: "Tatooine".into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_table_sql_is_idempotent_and_text_typed() {
        let sql = create_table_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS people ("));
        assert!(sql.contains("id SERIAL PRIMARY KEY"));
        for column in PEOPLE_COLUMNS {
            assert!(sql.contains(&format!("{column} VARCHAR")), "missing {column}");
        }
    }

    #[test]
    fn insert_chunks_stay_under_bind_limit() {
        assert!(MAX_ROWS_PER_INSERT * PEOPLE_COLUMNS.len() <= MAX_BIND_PARAMS);
        assert!(MAX_ROWS_PER_INSERT > 0);
    }

    #[tokio::test]
    async fn memory_store_schema_creation_is_idempotent() {
        let store = MemoryPeopleStore::new();
        store.ensure_schema().await.expect("first create");
        store.ensure_schema().await.expect("second create");
        assert_eq!(store.row_count().await, 0);
    }

    #[tokio::test]
    async fn memory_store_rejects_insert_before_schema() {
        let store = MemoryPeopleStore::new();
        let err = store
            .insert_batch(vec![record("Luke")])
            .await
            .expect_err("table missing");
        assert!(matches!(err, StoreError::MissingTable("people")));
        assert_eq!(store.row_count().await, 0);
    }

    #[tokio::test]
    async fn memory_store_appends_with_sequential_ids() {
        let store = MemoryPeopleStore::new();
        store.ensure_schema().await.expect("schema");

        assert_eq!(store.insert_batch(vec![record("Luke"), record("Leia")]).await.expect("first"), 2);
        assert_eq!(store.insert_batch(vec![record("Han")]).await.expect("second"), 1);

        let rows = store.rows().await;
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(rows[2].record, record("Han"));
    }

    #[tokio::test]
    async fn fetch_json_decodes_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/planets/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Tatooine"
            })))
            .mount(&server)
            .await;

        let http = HttpFetcher::new(HttpClientConfig::default()).expect("client");
        let value: serde_json::Value = http
            .fetch_json(&format!("{}/planets/1", server.uri()))
            .await
            .expect("fetch");
        assert_eq!(value["name"], "Tatooine");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/people/17"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let http = HttpFetcher::new(HttpClientConfig::default()).expect("client");
        let url = format!("{}/people/17", server.uri());
        let err = http.fetch_bytes(&url).await.expect_err("404");
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        assert_eq!(err.url(), url);
    }

    #[tokio::test]
    async fn redirected_failure_reports_the_requested_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/people/17"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("Location", format!("{}/people/17/", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/people/17/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let http = HttpFetcher::new(HttpClientConfig::default()).expect("client");
        let url = format!("{}/people/17", server.uri());
        let err = http.fetch_bytes(&url).await.expect_err("404 after redirect");
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        assert_eq!(err.url(), url);
    }

    #[tokio::test]
    async fn malformed_json_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/films/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let http = HttpFetcher::new(HttpClientConfig::default()).expect("client");
        let err = http
            .fetch_json::<serde_json::Value>(&format!("{}/films/1", server.uri()))
            .await
            .expect_err("not json");
        assert!(matches!(err, FetchError::Decode { .. }));
    }
}
