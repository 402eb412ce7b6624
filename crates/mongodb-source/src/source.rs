//! Source store abstraction.
//!
//! The sync driver only needs a filtered, optionally sorted, single-pass
//! cursor over one collection. `MongoSource` implements this on the MongoDB
//! driver and `testing::MemorySource` implements it in memory.

use async_trait::async_trait;
use sync_core::{DocValue, Document, Result};

/// What to ask the source for.
#[derive(Debug, Clone, PartialEq)]
pub struct FindSpec {
    /// `None` matches every document
    pub filter: Option<WatermarkFilter>,
    pub sort: Option<SortSpec>,
    /// Keep the server-side cursor alive however long the export idles
    pub no_cursor_timeout: bool,
}

/// `{field: {$gt: greater_than}}`
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkFilter {
    pub field: String,
    pub greater_than: DocValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

/// A store that can open cursors over its collections.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Open a cursor. Fails with `SyncError::SourceQuery` if the query is
    /// rejected or the store is unreachable.
    async fn find(
        &self,
        database: &str,
        collection: &str,
        spec: &FindSpec,
    ) -> Result<Box<dyn DocumentCursor>>;
}

/// A single-pass cursor over raw source documents.
///
/// Implementations must release their server-side resources both in
/// [`close`](DocumentCursor::close) and when dropped.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Fetch the next document, or `None` once the cursor is exhausted.
    ///
    /// Fails with `SyncError::SourceStream` if the cursor breaks mid-stream.
    async fn next_document(&mut self) -> Result<Option<Document>>;

    /// Release the cursor.
    fn close(self: Box<Self>);
}
