//! Search backends.

use async_trait::async_trait;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ConnectionConfig;
use crate::error::SearchError;
use crate::query::EnvelopeQuery;

/// Executes bounding box queries against a single search index.
///
/// Retries, pooling and authentication are the implementation's business;
/// providers call [`SearchClient::execute`] exactly once per tile layer.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Runs the query and returns the matched documents, in hit order.
    async fn execute(&self, query: &EnvelopeQuery) -> Result<Vec<Value>, SearchError>;
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: Option<Value>,
}

/// A minimal Elasticsearch `_search` client over HTTP.
pub struct ElasticsearchClient {
    http: Client,
    base_url: String,
    credentials: Option<(String, Option<String>)>,
}

impl ElasticsearchClient {
    pub fn new(config: &ConnectionConfig) -> Result<ElasticsearchClient, SearchError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(config.max_connections)
            .build()?;

        Ok(ElasticsearchClient {
            http,
            base_url: base_url(config),
            credentials: config
                .user
                .clone()
                .map(|user| (user, config.password.clone())),
        })
    }

    fn search_url(&self, index: &str) -> String {
        format!("{}/{}/_search", self.base_url, index)
    }
}

fn base_url(config: &ConnectionConfig) -> String {
    let host = config.host.trim_end_matches('/');
    let (scheme, authority) = host.split_once("://").unwrap_or(("http", host));
    let mut url = if has_port(authority) {
        format!("{}://{}", scheme, authority)
    } else {
        format!("{}://{}:{}", scheme, authority, config.port)
    };

    if let Some(prefix) = config.database.as_deref().map(|db| db.trim_matches('/')) {
        if !prefix.is_empty() {
            url.push('/');
            url.push_str(prefix);
        }
    }

    url
}

/// Whether a `host[:port]` authority already names a port. IPv6 literals
/// only count when the port follows the closing bracket.
fn has_port(authority: &str) -> bool {
    match authority.rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

#[async_trait]
impl SearchClient for ElasticsearchClient {
    async fn execute(&self, query: &EnvelopeQuery) -> Result<Vec<Value>, SearchError> {
        let mut request = self.http.post(self.search_url(&query.index)).json(&query.body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).chars().take(200).collect(),
            });
        }

        let result: SearchResponse = serde_json::from_slice(&body)?;
        tracing::trace!(index = %query.index, hits = result.hits.hits.len(), "Search complete");

        Ok(result
            .hits
            .hits
            .into_iter()
            .map(|hit| hit.source.unwrap_or(Value::Null))
            .collect())
    }
}
