//! Batched value-set queries against a remote FHIR server.
//!
//! The server bounds the size of an OR-combined `code` token filter, so a value set is split
//! into ordered batches of at most [`MAX_CODES_PER_QUERY`] concepts. Batches run one after
//! another; each batch follows `next` links until the server stops paginating. Results are
//! flattened in batch order without de-duplication.

use crate::constants::{FHIR_JSON_MEDIA_TYPE, MAX_CODES_PER_QUERY};
use crate::error::{CoreError, CoreResult};
use crate::session::Credentials;
use crate::value_set::{Concept, ValueSet};
use async_trait::async_trait;
use fhir::{Bundle, BundleData, BundleEntry};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One search request: a resource type, an optional OR-ed code filter and extra parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub resource_type: String,
    pub codes: Vec<Concept>,
    pub params: Vec<(String, String)>,
}

impl SearchQuery {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    pub fn with_codes(mut self, codes: &[Concept]) -> Self {
        self.codes = codes.to_vec();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// `system|code,system|code,...` with FHIR search escaping applied to each part.
    pub fn code_filter(&self) -> Option<String> {
        if self.codes.is_empty() {
            return None;
        }
        let tokens: Vec<String> = self
            .codes
            .iter()
            .map(|c| {
                format!(
                    "{}|{}",
                    escape_search_value(&c.system),
                    escape_search_value(&c.code)
                )
            })
            .collect();
        Some(tokens.join(","))
    }

    /// All query-string pairs, code filter first.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.params.len() + 1);
        if let Some(filter) = self.code_filter() {
            pairs.push(("code".to_string(), filter));
        }
        pairs.extend(self.params.iter().cloned());
        pairs
    }
}

/// Escape the characters FHIR search reserves inside token values.
fn escape_search_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | ',' | '|' | '$') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// A remote FHIR endpoint capable of coded searches and following paging links.
#[async_trait]
pub trait FhirSearchClient: Send + Sync {
    /// Execute a search and return its first page.
    async fn search(&self, query: &SearchQuery) -> CoreResult<BundleData>;

    /// Fetch a page by the absolute URL the server put in a `next` link.
    async fn next_page(&self, url: &str) -> CoreResult<BundleData>;

    /// Read a single resource by type and id.
    async fn read(&self, resource_type: &str, id: &str) -> CoreResult<serde_json::Value>;
}

/// [`FhirSearchClient`] over HTTP using `reqwest`.
pub struct HttpFhirClient {
    base_url: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl HttpFhirClient {
    /// Create a client for `base_url` whose every request times out after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::ConfigurationError(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
            client,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True if `url` lies under the base URL. Paging links elsewhere never get the bearer token.
    fn is_under_base(&self, url: &str) -> bool {
        url.strip_prefix(self.base_url.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?']))
    }

    async fn get_json(&self, request: reqwest::RequestBuilder) -> CoreResult<serde_json::Value> {
        let mut request = request.header(reqwest::header::ACCEPT, FHIR_JSON_MEDIA_TYPE);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::RemoteQueryFailed(e.to_string()))?;

        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::RemoteQueryFailed(format!(
                "{url} returned {status}: {body}"
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| CoreError::RemoteQueryFailed(format!("{url} returned invalid JSON: {e}")))
    }
}

fn bundle_from_value(value: serde_json::Value) -> CoreResult<BundleData> {
    Bundle::from_value(value)
        .map_err(|e| CoreError::RemoteQueryFailed(format!("malformed search bundle: {e}")))
}

#[async_trait]
impl FhirSearchClient for HttpFhirClient {
    async fn search(&self, query: &SearchQuery) -> CoreResult<BundleData> {
        let url = format!("{}/{}", self.base_url, query.resource_type);
        debug!("searching {url} with {} code(s)", query.codes.len());
        let value = self
            .get_json(self.client.get(&url).query(&query.query_pairs()))
            .await?;
        bundle_from_value(value)
    }

    async fn next_page(&self, url: &str) -> CoreResult<BundleData> {
        if !self.is_under_base(url) {
            return Err(CoreError::RemoteQueryFailed(format!(
                "next link {url} is outside {}",
                self.base_url
            )));
        }
        let value = self.get_json(self.client.get(url)).await?;
        bundle_from_value(value)
    }

    async fn read(&self, resource_type: &str, id: &str) -> CoreResult<serde_json::Value> {
        let url = format!("{}/{resource_type}/{id}", self.base_url);
        self.get_json(self.client.get(&url)).await
    }
}

/// Opens a FHIR client for a session's credentials.
pub trait FhirConnector: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> CoreResult<Arc<dyn FhirSearchClient>>;
}

/// Connects with [`HttpFhirClient`] to the server named in the credentials.
#[derive(Clone, Debug)]
pub struct HttpFhirConnector {
    timeout: Duration,
}

impl HttpFhirConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl FhirConnector for HttpFhirConnector {
    fn connect(&self, credentials: &Credentials) -> CoreResult<Arc<dyn FhirSearchClient>> {
        let mut client = HttpFhirClient::new(&credentials.fhir_base_url, self.timeout)?;
        if !credentials.bearer_token.trim().is_empty() {
            client = client.with_bearer_token(&credentials.bearer_token);
        }
        Ok(Arc::new(client))
    }
}

/// A shared client ignores the credentials and is handed to every session.
impl<T: FhirSearchClient + 'static> FhirConnector for Arc<T> {
    fn connect(&self, _credentials: &Credentials) -> CoreResult<Arc<dyn FhirSearchClient>> {
        Ok(Arc::clone(self) as Arc<dyn FhirSearchClient>)
    }
}

/// Splits value sets into bounded batches and flattens their paginated results.
#[derive(Clone)]
pub struct BatchQueryEngine {
    client: Arc<dyn FhirSearchClient>,
    batch_size: usize,
    subject: Option<String>,
    params: Vec<(String, String)>,
}

impl BatchQueryEngine {
    pub fn new(client: Arc<dyn FhirSearchClient>) -> Self {
        Self {
            client,
            batch_size: MAX_CODES_PER_QUERY,
            subject: None,
            params: Vec::new(),
        }
    }

    /// Override the batch size (clamped to `1..=MAX_CODES_PER_QUERY`).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.clamp(1, MAX_CODES_PER_QUERY);
        self
    }

    /// Restrict every search to one patient (`subject=Patient/<id>`).
    pub fn with_subject(mut self, patient_id: impl Into<String>) -> Self {
        self.subject = Some(patient_id.into());
        self
    }

    /// Extra search parameters added to every query.
    pub fn with_params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.params.extend(params);
        self
    }

    fn base_query(&self, resource_type: &str) -> SearchQuery {
        let mut query = SearchQuery::new(resource_type);
        if let Some(subject) = &self.subject {
            query = query.with_param("subject", format!("Patient/{subject}"));
        }
        query.params.extend(self.params.iter().cloned());
        query
    }

    /// Query `resource_type` for every concept of `value_set`.
    ///
    /// Issues `ceil(n / batch_size)` searches. Any remote failure aborts the whole
    /// operation with [`CoreError::RemoteQueryFailed`]; no partial results are returned.
    pub async fn query_by_value_set(
        &self,
        resource_type: &str,
        value_set: &ValueSet,
    ) -> CoreResult<Vec<BundleEntry>> {
        let mut results = Vec::new();
        for (index, batch) in value_set.batches(self.batch_size).enumerate() {
            let query = self.base_query(resource_type).with_codes(batch);
            let entries = self.collect_pages(&query).await?;
            debug!(
                "{resource_type} batch {index} of value set {} returned {} entries",
                value_set.oid(),
                entries.len()
            );
            results.extend(entries);
        }
        Ok(results)
    }

    /// Un-coded search for every `resource_type` in scope, following pagination.
    pub async fn query_all(&self, resource_type: &str) -> CoreResult<Vec<BundleEntry>> {
        let query = self.base_query(resource_type);
        self.collect_pages(&query).await
    }

    /// Read a single resource.
    pub async fn read(&self, resource_type: &str, id: &str) -> CoreResult<serde_json::Value> {
        self.client
            .read(resource_type, id)
            .await
            .map_err(into_remote_failure)
    }

    async fn collect_pages(&self, query: &SearchQuery) -> CoreResult<Vec<BundleEntry>> {
        let mut page = self
            .client
            .search(query)
            .await
            .map_err(into_remote_failure)?;
        let mut entries = std::mem::take(&mut page.entries);
        let mut visited = HashSet::new();

        while let Some(next) = page.next.take() {
            if !visited.insert(next.clone()) {
                return Err(CoreError::RemoteQueryFailed(format!(
                    "server repeated next link {next}"
                )));
            }
            page = self
                .client
                .next_page(&next)
                .await
                .map_err(into_remote_failure)?;
            entries.append(&mut page.entries);
        }

        Ok(entries)
    }
}

fn into_remote_failure(err: CoreError) -> CoreError {
    match err {
        CoreError::RemoteQueryFailed(_) => err,
        other => CoreError::RemoteQueryFailed(other.to_string()),
    }
}
