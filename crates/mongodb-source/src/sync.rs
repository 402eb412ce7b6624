//! Collection export driver.
//!
//! One run goes `INIT → RESOLVE_WATERMARK (optional) → STREAMING → DONE`, or
//! ends in failure on the first unrecovered source or sink error. Documents
//! already upserted before a failure stay indexed; rerunning resends them
//! and the upsert-by-id makes that a no-op.

use chrono::SecondsFormat;
use es_sink::IndexSink;
use sync_core::{sanitize_document, Denylist, DocValue, Document, Result, SyncError};
use tokio_util::sync::CancellationToken;

use crate::source::DocumentSource;
use crate::stream::{open_stream, CollectionStream};
use crate::watermark::{resolve_resume_point, ResumePoint, WatermarkConfig};

pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

/// Everything one export run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub database: String,
    pub collection: String,
    /// Explicit index name; derived from database and collection if `None`
    pub index: Option<String>,
    pub denylist: Denylist,
    /// Enables incremental export when set
    pub watermark: Option<WatermarkConfig>,
    /// Stream and sanitize but do not write to the sink
    pub dry_run: bool,
    /// Log progress every this many documents; 0 disables
    pub progress_interval: u64,
}

impl SyncConfig {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            index: None,
            denylist: Denylist::new(),
            watermark: None,
            dry_run: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(SyncError::Configuration(
                "MongoDB source database name is required".to_string(),
            ));
        }
        if self.collection.trim().is_empty() {
            return Err(SyncError::Configuration(
                "MongoDB source collection name is required".to_string(),
            ));
        }
        if let Some(wm) = &self.watermark {
            if wm.field.trim().is_empty() {
                return Err(SyncError::Configuration(
                    "Watermark field name cannot be empty".to_string(),
                ));
            }
        }
        if matches!(&self.index, Some(index) if index.trim().is_empty()) {
            return Err(SyncError::Configuration(
                "Index name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Destination index, always lower-case.
    pub fn index_name(&self) -> String {
        match &self.index {
            Some(index) => index.to_lowercase(),
            None => derive_index_name(&self.database, &self.collection),
        }
    }

    /// Document type the collection is indexed under.
    pub fn doc_type(&self) -> String {
        self.collection.to_lowercase()
    }
}

/// `mongodb-{database}-{collection}`, lower-cased.
pub fn derive_index_name(database: &str, collection: &str) -> String {
    format!("mongodb-{database}-{collection}").to_lowercase()
}

/// Outcome of one export run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSummary {
    pub index: String,
    /// Where the run resumed; `None` for a full export
    pub resume_point: Option<ResumePoint>,
    pub documents_processed: u64,
    pub first_document_id: Option<String>,
    /// First sanitized document body, without `_id`
    pub first_document: Option<Document>,
    pub dry_run: bool,
}

impl SyncSummary {
    pub fn is_incremental(&self) -> bool {
        self.resume_point.is_some()
    }
}

/// Exports one collection from a [`DocumentSource`] into an [`IndexSink`].
pub struct SyncDriver<'a, Src: ?Sized, S: ?Sized> {
    source: &'a Src,
    sink: &'a S,
    config: SyncConfig,
}

impl<'a, Src, S> SyncDriver<'a, Src, S>
where
    Src: DocumentSource + ?Sized,
    S: IndexSink + ?Sized,
{
    pub fn new(source: &'a Src, sink: &'a S, config: SyncConfig) -> Self {
        Self {
            source,
            sink,
            config,
        }
    }

    /// Run one export to completion.
    pub async fn run(&self) -> Result<SyncSummary> {
        self.run_until_cancelled(&CancellationToken::new()).await
    }

    /// Run one export, stopping with [`SyncError::Cancelled`] if `cancel`
    /// fires while waiting on the source.
    pub async fn run_until_cancelled(&self, cancel: &CancellationToken) -> Result<SyncSummary> {
        self.config.validate()?;

        let config = &self.config;
        let index = config.index_name();
        let doc_type = config.doc_type();

        tracing::info!(
            "Starting export of {}.{} to {index}",
            config.database,
            config.collection
        );
        if config.dry_run {
            tracing::info!("Running in dry-run mode - no data will be written");
        }
        if !config.denylist.is_empty() {
            tracing::debug!(
                "Dropping {} denylisted top-level fields",
                config.denylist.len()
            );
        }

        self.sink.ensure_index(&index).await?;

        let resume_point = match &config.watermark {
            Some(wm) => resolve_resume_point(self.sink, &index, &doc_type, wm).await?,
            None => None,
        };

        let mut stream = open_stream(
            self.source,
            &config.database,
            &config.collection,
            config.watermark.as_ref().map(|wm| wm.field.as_str()),
            resume_point.as_ref(),
        )
        .await?;

        let mut summary = SyncSummary {
            index,
            resume_point,
            documents_processed: 0,
            first_document_id: None,
            first_document: None,
            dry_run: config.dry_run,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = stream.next() => Some(next),
            };

            let raw = match next {
                None => {
                    tracing::warn!(
                        "Export of {}.{} cancelled after {} documents",
                        config.database,
                        config.collection,
                        summary.documents_processed
                    );
                    stream.close();
                    return Err(SyncError::Cancelled);
                }
                Some(next) => match next? {
                    Some(raw) => raw,
                    None => break,
                },
            };

            if let Err(e) = self.process_document(raw, &doc_type, &mut summary).await {
                close_after_failure(stream, &e);
                return Err(e);
            }
        }

        tracing::info!(
            "Finished export of {}.{}: {} documents to {}",
            config.database,
            config.collection,
            summary.documents_processed,
            summary.index
        );
        Ok(summary)
    }

    async fn process_document(
        &self,
        raw: Document,
        doc_type: &str,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let mut doc = sanitize_document(raw, &self.config.denylist)?;
        let id = take_document_id(&mut doc)?;

        if summary.first_document_id.is_none() {
            tracing::debug!("First document in this run: {id}");
            summary.first_document_id = Some(id.clone());
            summary.first_document = Some(doc.clone());
        }

        if self.config.dry_run {
            tracing::trace!("Dry-run mode: skipping document {id}");
        } else {
            tracing::trace!("Indexing document {id}");
            self.sink.upsert(&summary.index, doc_type, &id, &doc).await?;
        }

        summary.documents_processed += 1;
        let interval = self.config.progress_interval;
        if interval > 0 && summary.documents_processed % interval == 0 {
            tracing::info!(
                "Processed {} documents into {}",
                summary.documents_processed,
                summary.index
            );
        }
        Ok(())
    }
}

fn close_after_failure(stream: CollectionStream, error: &SyncError) {
    tracing::error!(
        "Stopping export after {} documents: {error}",
        stream.yielded()
    );
    stream.close();
}

/// Remove `_id` from a sanitized document and turn it into the index id.
///
/// Scalars render the way they appear in indexed bodies, and embedded
/// documents render as compact JSON. Null and arrays cannot identify a
/// document.
fn take_document_id(doc: &mut Document) -> Result<String> {
    match doc.shift_remove("_id") {
        Some(DocValue::Text(s)) => Ok(s),
        Some(DocValue::Int64(i)) => Ok(i.to_string()),
        Some(DocValue::Float64(f)) => Ok(f.to_string()),
        Some(DocValue::Bool(b)) => Ok(b.to_string()),
        Some(DocValue::Timestamp(dt)) => Ok(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Some(DocValue::ObjectId(oid)) => Ok(oid.to_hex()),
        Some(DocValue::Object(inner)) => serde_json::to_string(&inner).map_err(|e| {
            SyncError::TypeInput(format!("Cannot encode embedded document id: {e}"))
        }),
        Some(other @ (DocValue::Null | DocValue::Array(_))) => {
            Err(SyncError::UnsupportedDocumentId {
                type_name: other.type_name(),
            })
        }
        None => Err(SyncError::MissingDocumentId),
    }
}
