//! In-memory [`DocumentSource`] for tests.
//!
//! `MemorySource` evaluates [`FindSpec`]s the way MongoDB would for the
//! subset the driver uses: a strict `$gt` on one field and a single-field
//! sort. It also counts open cursors so tests can check that every exit path
//! releases them.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_core::{DocValue, Document, Result, SyncError};

use crate::source::{DocumentCursor, DocumentSource, FindSpec};

#[derive(Default)]
struct State {
    collections: BTreeMap<(String, String), Vec<Document>>,
    finds: Vec<FindSpec>,
    fail_stream_after: Option<usize>,
    fail_queries: bool,
}

/// Thread-safe in-memory source.
#[derive(Default)]
pub struct MemorySource {
    state: Mutex<State>,
    open_cursors: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a document to `database.collection`, keeping insertion order.
    pub fn insert(&self, database: &str, collection: &str, doc: Document) {
        self.state()
            .collections
            .entry((database.to_string(), collection.to_string()))
            .or_default()
            .push(doc);
    }

    /// Make cursors fail with a stream error after yielding `n` documents.
    pub fn fail_stream_after(&self, n: usize) {
        self.state().fail_stream_after = Some(n);
    }

    /// Make every `find` fail with a query error.
    pub fn fail_queries(&self) {
        self.state().fail_queries = true;
    }

    /// Specs passed to `find`, in call order.
    pub fn find_calls(&self) -> Vec<FindSpec> {
        self.state().finds.clone()
    }

    /// Cursors opened and not yet released.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        spec: &FindSpec,
    ) -> Result<Box<dyn DocumentCursor>> {
        let mut state = self.state();
        state.finds.push(spec.clone());
        if state.fail_queries {
            return Err(SyncError::SourceQuery(format!(
                "injected failure querying {database}.{collection}"
            )));
        }

        let mut docs: Vec<Document> = state
            .collections
            .get(&(database.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|doc| match &spec.filter {
                Some(f) => doc
                    .get(&f.field)
                    .and_then(|v| v.partial_cmp_scalar(&f.greater_than))
                    == Some(Ordering::Greater),
                None => true,
            })
            .collect();

        if let Some(sort) = &spec.sort {
            docs.sort_by(|a, b| {
                let ord = compare_field(a.get(&sort.field), b.get(&sort.field));
                if sort.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        self.open_cursors.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MemoryCursor {
            docs: docs.into(),
            yielded: 0,
            fail_after: state.fail_stream_after,
            open_cursors: Arc::clone(&self.open_cursors),
        }))
    }
}

/// Missing fields sort lowest, like MongoDB's null ordering.
fn compare_field(a: Option<&DocValue>, b: Option<&DocValue>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp_scalar(b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

struct MemoryCursor {
    docs: VecDeque<Document>,
    yielded: usize,
    fail_after: Option<usize>,
    open_cursors: Arc<AtomicUsize>,
}

#[async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        if self.fail_after == Some(self.yielded) {
            return Err(SyncError::SourceStream(
                "injected connection reset".to_string(),
            ));
        }
        let next = self.docs.pop_front();
        if next.is_some() {
            self.yielded += 1;
        }
        Ok(next)
    }

    fn close(self: Box<Self>) {
        drop(self);
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.open_cursors.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}
