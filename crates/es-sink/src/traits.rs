//! IndexSink trait definition.

use async_trait::async_trait;
use serde::Deserialize;
use sync_core::{Document, Result};

/// Trait for writing documents to a search index.
///
/// # Usage Pattern
///
/// The sync driver is generic over the sink, so calls are statically
/// dispatched after monomorphization:
///
/// ```ignore
/// pub async fn run<S: IndexSink>(sink: &S, ...) -> Result<()> {
///     sink.ensure_index(&index).await?;
///     sink.upsert(&index, "orders", &id, &body).await?;
/// }
/// ```
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Create the index if it does not exist.
    ///
    /// An index that already exists is not an error.
    async fn ensure_index(&self, index: &str) -> Result<()>;

    /// Insert or replace the document stored under `id`.
    async fn upsert(&self, index: &str, doc_type: &str, id: &str, body: &Document) -> Result<()>;

    /// Run a search query against the index.
    ///
    /// `query` is an Elasticsearch query DSL body. Only the parts the sync
    /// driver needs are guaranteed to be honored: `size`, the first `sort`
    /// clause, `_source` field filtering, and `match_all` / `exists` queries.
    async fn search(
        &self,
        index: &str,
        doc_type: &str,
        query: &serde_json::Value,
    ) -> Result<SearchResponse>;
}

/// Hits returned by [`IndexSink::search`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    /// Sort values, one per sort clause. Dates are epoch milliseconds.
    ///
    /// Values come from the index's field mapping, so a double stored into
    /// a dynamically mapped `float` field comes back rounded to 32 bits.
    #[serde(default)]
    pub sort: Vec<serde_json::Value>,
    /// The stored document, filtered by the query's `_source` clause.
    #[serde(rename = "_source", default)]
    pub source: Option<serde_json::Value>,
}
