//! Elasticsearch REST implementation of [`IndexSink`].
//!
//! Each operation is one HTTP request; there is no batching and no retry.
//! Failures surface as [`SyncError::Sink`] with the response body attached
//! so the operator can see what the cluster rejected.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use sync_core::{Document, Result, SyncError};

use crate::traits::{IndexSink, SearchHit, SearchResponse};

/// Error types Elasticsearch reports when creating an index that exists.
/// The second one is what clusters before 6.0 send.
const ALREADY_EXISTS_ERROR_TYPES: [&str; 2] = [
    "resource_already_exists_exception",
    "index_already_exists_exception",
];

/// Elasticsearch connection options (library type without clap)
#[derive(Clone, Debug)]
pub struct ElasticsearchOpts {
    /// Base URL, e.g. `http://localhost:9200`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Put the document type in request paths (`/{index}/{type}/{id}`).
    ///
    /// Clusters from 7.0 on have no mapping types; disable this to use
    /// `/{index}/_doc/{id}` instead.
    pub mapping_types: bool,
    pub request_timeout: Duration,
}

impl Default for ElasticsearchOpts {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            mapping_types: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Writes documents to Elasticsearch over HTTP.
pub struct ElasticsearchSink {
    client: Client,
    base_url: Url,
    opts: ElasticsearchOpts,
}

impl ElasticsearchSink {
    pub fn new(opts: ElasticsearchOpts) -> Result<Self> {
        let base_url = Url::parse(&opts.url).map_err(|e| {
            SyncError::Configuration(format!("Invalid Elasticsearch URL '{}': {e}", opts.url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Configuration(format!(
                "Elasticsearch URL '{}' cannot be used as a base URL",
                opts.url
            )));
        }

        let client = Client::builder()
            .timeout(opts.request_timeout)
            .build()
            .map_err(|e| SyncError::Sink(format!("Failed to build HTTP client: {e}")))?;

        tracing::debug!("Elasticsearch sink targeting {base_url}");

        Ok(Self {
            client,
            base_url,
            opts,
        })
    }

    /// Build a URL under the base by appending percent-encoded segments.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base URLs, so this always succeeds
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.opts.username {
            Some(username) => builder.basic_auth(username, self.opts.password.as_ref()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        builder
            .send()
            .await
            .map_err(|e| SyncError::Sink(format!("Failed to {what}: {e}")))
    }

    fn document_path<'a>(&self, index: &'a str, doc_type: &'a str, id: &'a str) -> [&'a str; 3] {
        if self.opts.mapping_types {
            [index, doc_type, id]
        } else {
            [index, "_doc", id]
        }
    }

    fn search_path<'a>(&self, index: &'a str, doc_type: &'a str) -> Vec<&'a str> {
        if self.opts.mapping_types {
            vec![index, doc_type, "_search"]
        } else {
            vec![index, "_search"]
        }
    }
}

#[async_trait]
impl IndexSink for ElasticsearchSink {
    async fn ensure_index(&self, index: &str) -> Result<()> {
        let url = self.endpoint(&[index]);
        let response = self
            .send(
                self.request(Method::PUT, url),
                &format!("create index '{index}'"),
            )
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("Created index '{index}'");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && is_already_exists_error(&body) {
            tracing::debug!("Index '{index}' already exists");
            return Ok(());
        }

        Err(SyncError::Sink(format!(
            "Failed to create index '{index}': {status}: {body}"
        )))
    }

    async fn upsert(&self, index: &str, doc_type: &str, id: &str, body: &Document) -> Result<()> {
        let url = self.endpoint(&self.document_path(index, doc_type, id));
        tracing::trace!("Indexing document {id} at {url}");

        let response = self
            .send(
                self.request(Method::PUT, url).json(body),
                &format!("index document '{id}'"),
            )
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(SyncError::Sink(format!(
            "Failed to index document '{id}' into '{index}': {status}: {text}"
        )))
    }

    async fn search(
        &self,
        index: &str,
        doc_type: &str,
        query: &serde_json::Value,
    ) -> Result<SearchResponse> {
        let url = self.endpoint(&self.search_path(index, doc_type));
        tracing::debug!("Searching {url} with {query}");

        let response = self
            .send(
                self.request(Method::POST, url).json(query),
                &format!("search index '{index}'"),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::Sink(format!(
                "Search on '{index}' failed: {status}: {text}"
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| SyncError::Sink(format!("Failed to read search response: {e}")))?;
        parse_search_response(&text)
    }
}

#[derive(Deserialize)]
struct RawSearchResponse {
    hits: RawHits,
}

#[derive(Deserialize)]
struct RawHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

fn parse_search_response(body: &str) -> Result<SearchResponse> {
    let raw: RawSearchResponse = serde_json::from_str(body)
        .map_err(|e| SyncError::Sink(format!("Invalid search response: {e}")))?;
    Ok(SearchResponse {
        hits: raw.hits.hits,
    })
}

fn is_already_exists_error(body: &str) -> bool {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(rename = "type")]
        kind: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => ALREADY_EXISTS_ERROR_TYPES.contains(&parsed.error.kind.as_str()),
        Err(_) => ALREADY_EXISTS_ERROR_TYPES.iter().any(|t| body.contains(t)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sink(url: &str, mapping_types: bool) -> ElasticsearchSink {
        ElasticsearchSink::new(ElasticsearchOpts {
            url: url.to_string(),
            mapping_types,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_document_endpoint_with_mapping_types() {
        let s = sink("http://localhost:9200", true);
        let url = s.endpoint(&s.document_path("mongodb-shop-orders", "orders", "abc"));
        assert_eq!(
            url.as_str(),
            "http://localhost:9200/mongodb-shop-orders/orders/abc"
        );
    }

    #[test]
    fn test_document_endpoint_without_mapping_types() {
        let s = sink("http://es.internal:9200/", false);
        let url = s.endpoint(&s.document_path("idx", "orders", "abc"));
        assert_eq!(url.as_str(), "http://es.internal:9200/idx/_doc/abc");
        let url = s.endpoint(&s.search_path("idx", "orders"));
        assert_eq!(url.as_str(), "http://es.internal:9200/idx/_search");
    }

    #[test]
    fn test_endpoint_keeps_base_path_and_encodes_ids() {
        let s = sink("https://proxy.example.com/es", true);
        let url = s.endpoint(&s.document_path("idx", "t", "a/b c"));
        assert_eq!(
            url.as_str(),
            "https://proxy.example.com/es/idx/t/a%2Fb%20c"
        );
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let err = ElasticsearchSink::new(ElasticsearchOpts {
            url: "not a url".to_string(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn test_already_exists_detection() {
        let modern = json!({
            "error": {"type": "resource_already_exists_exception", "reason": "index [x/abc] already exists"},
            "status": 400
        })
        .to_string();
        let legacy = json!({
            "error": {"type": "index_already_exists_exception"},
            "status": 400
        })
        .to_string();
        let other = json!({
            "error": {"type": "invalid_index_name_exception"},
            "status": 400
        })
        .to_string();

        assert!(is_already_exists_error(&modern));
        assert!(is_already_exists_error(&legacy));
        assert!(!is_already_exists_error(&other));
        assert!(is_already_exists_error(
            "IndexAlreadyExistsException[[x] resource_already_exists_exception]"
        ));
        assert!(!is_already_exists_error(""));
    }

    #[test]
    fn test_parse_search_response() {
        let body = json!({
            "took": 3,
            "hits": {
                "total": {"value": 2, "relation": "eq"},
                "hits": [
                    {"_index": "i", "_id": "oid2", "_source": {"ts": 200}, "sort": [1700000000000i64]}
                ]
            }
        })
        .to_string();

        let response = parse_search_response(&body).unwrap();
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].id.as_deref(), Some("oid2"));
        assert_eq!(response.hits[0].sort, vec![json!(1700000000000i64)]);
        assert_eq!(response.hits[0].source, Some(json!({"ts": 200})));
    }

    #[test]
    fn test_parse_hit_without_source() {
        let body = json!({"hits": {"hits": [{"_id": "a", "sort": [0.30000001192092896]}]}})
            .to_string();
        let response = parse_search_response(&body).unwrap();
        assert_eq!(response.hits[0].source, None);
        assert_eq!(response.hits[0].sort, vec![json!(0.30000001192092896)]);
    }

    #[test]
    fn test_parse_empty_search_response() {
        let body = json!({"hits": {"total": 0, "hits": []}}).to_string();
        assert!(parse_search_response(&body).unwrap().hits.is_empty());
        assert!(parse_search_response("{}").is_err());
    }
}
