//! Pinecone data-plane and control-plane client.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

/// Control-plane base used to look up index hosts.
pub const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";

/// Arbitrary JSON metadata attached to a vector.
pub type Metadata = Map<String, Value>;

/// Single vector as sent to `/vectors/upsert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Unique vector id.
    pub id: String,
    /// Vector components.
    pub values: Vec<f64>,
    /// Filterable metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Metadata,
}

/// Index details returned by the control plane.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexDescription {
    /// Index name.
    pub name: String,
    /// Vector dimension.
    pub dimension: usize,
    /// Data-plane host.
    pub host: String,
    /// Similarity metric, e.g. `cosine`.
    #[serde(default)]
    pub metric: Option<String>,
}

/// Similarity query options.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Namespace to search.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Query vector.
    pub vector: Vec<f64>,
    /// Number of matches to return.
    pub top_k: usize,
    /// Return stored values with each match.
    pub include_values: bool,
    /// Return stored metadata with each match.
    pub include_metadata: bool,
    /// Metadata filter expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

impl QueryRequest {
    /// Query for `top_k` neighbours of `vector` with metadata included.
    pub fn new(vector: Vec<f64>, top_k: usize) -> Self {
        Self {
            namespace: String::new(),
            vector,
            top_k,
            include_values: false,
            include_metadata: true,
            filter: None,
        }
    }
}

/// Nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryMatch {
    /// Vector id.
    pub id: String,
    /// Similarity score.
    #[serde(default)]
    pub score: f64,
    /// Stored values when requested.
    #[serde(default)]
    pub values: Vec<f64>,
    /// Stored metadata when requested.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Response body of `/query`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryResponse {
    /// Matches ordered by score.
    #[serde(default)]
    pub matches: Vec<QueryMatch>,
    /// Namespace searched.
    #[serde(default)]
    pub namespace: String,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    namespace: &'a str,
    ids: &'a [String],
    delete_all: bool,
}

/// Destination for vectors produced by the recorder.
pub trait VectorSink {
    /// Inserts or replaces `vectors`, returning the upserted count.
    fn upsert(&self, vectors: &[VectorRecord]) -> Result<usize>;
    /// Removes `ids` from the default namespace.
    fn delete(&self, ids: &[String]) -> Result<()>;
}

/// Blocking client for a single Pinecone index.
#[derive(Clone)]
pub struct PineconeClient {
    client: Client,
    index_url: Url,
    control_url: Url,
    dimension: usize,
    max_retries: usize,
}

impl PineconeClient {
    /// Builds a new client.
    ///
    /// # Arguments
    /// * `api_key` - Value for the `Api-Key` header (usually from `PINECONE_API_KEY`)
    /// * `host` - Index data-plane host, with or without an `https://` prefix
    /// * `dimension` - Expected vector length; upserts with other lengths are rejected
    pub fn new(
        api_key: &str,
        host: &str,
        dimension: usize,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Pinecone API key");
        anyhow::ensure!(dimension > 0, "vector dimension must be positive");
        let index_url = parse_host(host)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(api_key.trim()).context("invalid Pinecone API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Pinecone HTTP client")?;
        Ok(Self {
            client,
            index_url,
            control_url: Url::parse(CONTROL_PLANE_URL).context("invalid control plane URL")?,
            dimension,
            max_retries: max_retries.max(1),
        })
    }

    /// Overrides the control-plane base URL.
    pub fn with_control_plane(mut self, base: &str) -> Result<Self> {
        self.control_url = parse_host(base)?;
        Ok(self)
    }

    /// Expected vector length.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Data-plane base URL.
    pub fn index_url(&self) -> &Url {
        &self.index_url
    }

    /// Looks up an index by name on the control plane.
    pub fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        anyhow::ensure!(!name.trim().is_empty(), "missing index name");
        let url = join(&self.control_url, &format!("indexes/{}", name.trim()))?;
        self.send_json(|| self.client.get(url.clone()), "describe index")
    }

    /// Inserts or replaces vectors.
    pub fn upsert(&self, vectors: &[VectorRecord]) -> Result<usize> {
        if vectors.is_empty() {
            return Ok(0);
        }
        for record in vectors {
            anyhow::ensure!(
                record.values.len() == self.dimension,
                "vector {} has {} values, index expects {}",
                record.id,
                record.values.len(),
                self.dimension
            );
        }
        let url = join(&self.index_url, "vectors/upsert")?;
        let body = UpsertRequest { vectors };
        let response: UpsertResponse =
            self.send_json(|| self.client.post(url.clone()).json(&body), "upsert")?;
        debug!(count = response.upserted_count, "upserted vectors");
        Ok(response.upserted_count)
    }

    /// Runs a similarity query.
    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        anyhow::ensure!(request.top_k > 0, "top_k must be positive");
        anyhow::ensure!(
            request.vector.len() == self.dimension,
            "query vector has {} values, index expects {}",
            request.vector.len(),
            self.dimension
        );
        let url = join(&self.index_url, "query")?;
        self.send_json(|| self.client.post(url.clone()).json(request), "query")
    }

    /// Deletes ids from `namespace` (empty for the default namespace).
    pub fn delete_in(&self, ids: &[String], namespace: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = join(&self.index_url, "vectors/delete")?;
        let body = DeleteRequest {
            namespace,
            ids,
            delete_all: false,
        };
        let _: Value = self.send_json(|| self.client.post(url.clone()).json(&body), "delete")?;
        Ok(())
    }

    fn send_json<T, F>(&self, build: F, operation: &str) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let response = self.send_with_retry(build, operation)?;
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read Pinecone {operation} response"))?;
        let body: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &bytes[..]
        };
        serde_json::from_slice(body)
            .with_context(|| format!("failed to parse Pinecone {operation} response"))
    }

    fn send_with_retry<F>(&self, build: F, operation: &str) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match build().send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "Pinecone {operation} failed; retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("Pinecone {operation} request failed ({status}): {body}");
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(attempt, "Pinecone {operation} transport error: {err}");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err).with_context(|| format!("Pinecone {operation} request failed"));
                }
            }
        }
    }
}

impl VectorSink for PineconeClient {
    fn upsert(&self, vectors: &[VectorRecord]) -> Result<usize> {
        PineconeClient::upsert(self, vectors)
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        self.delete_in(ids, "")
    }
}

fn parse_host(host: &str) -> Result<Url> {
    let host = host.trim().trim_end_matches('/');
    anyhow::ensure!(!host.is_empty(), "missing Pinecone host");
    let with_scheme = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    let mut url = Url::parse(&with_scheme).with_context(|| format!("invalid host {host}"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .with_context(|| format!("failed to build URL for {path}"))
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(250 * (1 << capped))
}
