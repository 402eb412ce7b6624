//! In-memory [`IndexSink`] for tests.
//!
//! `MemorySink` stores documents keyed by index and id and answers the
//! subset of search queries the sync driver issues. Sort values mimic
//! Elasticsearch: timestamps sort and report as epoch milliseconds.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use sync_core::{DocValue, Document, Result, SyncError};

use crate::traits::{IndexSink, SearchHit, SearchResponse};

/// A stored document with the type it was indexed under.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub doc_type: String,
    pub body: Document,
}

#[derive(Default)]
struct State {
    indices: BTreeMap<String, BTreeMap<String, StoredDocument>>,
    upsert_log: Vec<String>,
    search_count: usize,
    fail_after_upserts: Option<usize>,
}

/// Thread-safe in-memory sink.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<State>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every upsert after the first `n` fail with a sink error.
    pub fn fail_after_upserts(&self, n: usize) {
        self.state().fail_after_upserts = Some(n);
    }

    /// Store a document directly, bypassing the upsert log.
    pub fn insert(&self, index: &str, doc_type: &str, id: &str, body: Document) {
        self.state()
            .indices
            .entry(index.to_string())
            .or_default()
            .insert(
                id.to_string(),
                StoredDocument {
                    doc_type: doc_type.to_string(),
                    body,
                },
            );
    }

    pub fn index_names(&self) -> BTreeSet<String> {
        self.state().indices.keys().cloned().collect()
    }

    /// Snapshot of an index, keyed by document id.
    pub fn documents(&self, index: &str) -> BTreeMap<String, StoredDocument> {
        self.state()
            .indices
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, index: &str, id: &str) -> Option<StoredDocument> {
        self.state().indices.get(index)?.get(id).cloned()
    }

    /// Ids passed to `upsert`, in call order.
    pub fn upserted_ids(&self) -> Vec<String> {
        self.state().upsert_log.clone()
    }

    pub fn search_count(&self) -> usize {
        self.state().search_count
    }
}

#[async_trait]
impl IndexSink for MemorySink {
    async fn ensure_index(&self, index: &str) -> Result<()> {
        self.state().indices.entry(index.to_string()).or_default();
        Ok(())
    }

    async fn upsert(&self, index: &str, doc_type: &str, id: &str, body: &Document) -> Result<()> {
        let mut state = self.state();
        if let Some(limit) = state.fail_after_upserts {
            if state.upsert_log.len() >= limit {
                return Err(SyncError::Sink(format!(
                    "injected failure indexing document '{id}'"
                )));
            }
        }
        let docs = state
            .indices
            .get_mut(index)
            .ok_or_else(|| SyncError::Sink(format!("no such index [{index}]")))?;
        docs.insert(
            id.to_string(),
            StoredDocument {
                doc_type: doc_type.to_string(),
                body: body.clone(),
            },
        );
        state.upsert_log.push(id.to_string());
        Ok(())
    }

    async fn search(&self, index: &str, doc_type: &str, query: &Value) -> Result<SearchResponse> {
        let mut state = self.state();
        state.search_count += 1;
        let docs = state
            .indices
            .get(index)
            .ok_or_else(|| SyncError::Sink(format!("no such index [{index}]")))?;

        let size = query
            .get("size")
            .and_then(Value::as_u64)
            .map_or(10, |s| s as usize);
        let (sort_field, descending) = first_sort_clause(query);
        let exists_field = query
            .pointer("/query/exists/field")
            .and_then(Value::as_str);
        let source_fields: Option<Vec<&str>> = query
            .get("_source")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect());

        let mut hits = Vec::new();
        for (id, stored) in docs {
            if stored.doc_type != doc_type
                || !exists_field.map_or(true, |f| stored.body.contains_key(f))
            {
                continue;
            }
            let sort = sort_field.and_then(|f| stored.body.get(f)).and_then(sort_value);
            let source = filtered_source(&stored.body, source_fields.as_deref())?;
            hits.push((id.clone(), sort, source));
        }

        if sort_field.is_some() {
            // Missing values sort last, as in Elasticsearch
            hits.sort_by(|(_, a, _), (_, b, _)| match (a, b) {
                (Some(a), Some(b)) => {
                    let ord = compare_json(a, b);
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }

        Ok(SearchResponse {
            hits: hits
                .into_iter()
                .take(size)
                .map(|(id, sort, source)| SearchHit {
                    id: Some(id),
                    sort: sort.into_iter().collect(),
                    source: Some(source),
                })
                .collect(),
        })
    }
}

fn first_sort_clause(query: &Value) -> (Option<&str>, bool) {
    let Some(clause) = query.get("sort").and_then(|s| s.get(0)) else {
        return (None, false);
    };
    match clause {
        Value::String(field) => (Some(field.as_str()), false),
        Value::Object(map) => match map.iter().next() {
            Some((field, spec)) => {
                let order = spec.get("order").and_then(Value::as_str).or(spec.as_str());
                (Some(field.as_str()), order == Some("desc"))
            }
            None => (None, false),
        },
        _ => (None, false),
    }
}

/// Body as JSON, keeping only `fields` when the query names any.
fn filtered_source(body: &Document, fields: Option<&[&str]>) -> Result<Value> {
    let mut source = serde_json::to_value(body)
        .map_err(|e| SyncError::Sink(format!("Failed to encode stored document: {e}")))?;
    if let (Some(fields), Value::Object(map)) = (fields, &mut source) {
        map.retain(|key, _| fields.contains(&key.as_str()));
    }
    Ok(source)
}

fn sort_value(value: &DocValue) -> Option<Value> {
    match value {
        DocValue::Int64(i) => Some(Value::from(*i)),
        DocValue::Float64(f) => serde_json::Number::from_f64(*f).map(Value::Number),
        DocValue::Timestamp(dt) => Some(Value::from(dt.timestamp_millis())),
        DocValue::Text(s) => Some(Value::from(s.as_str())),
        DocValue::Bool(b) => Some(Value::from(*b)),
        _ => None,
    }
}

fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
