//! Collection streaming.
//!
//! [`CollectionStream`] owns the source cursor for the duration of one run.
//! The cursor is released when the stream is exhausted, when it fails, when
//! [`CollectionStream::close`] is called, and, as a last resort, when the
//! stream is dropped (early `?` return, cancelled future).

use sync_core::{Document, Result, SyncError};

use crate::source::{DocumentCursor, DocumentSource, FindSpec, SortSpec, WatermarkFilter};
use crate::watermark::ResumePoint;

/// Build the query for one run.
///
/// With a resume point only documents whose watermark is strictly greater
/// are selected; a document sharing the exact resume value is not re-sent.
/// With a watermark field the cursor is sorted on it, newest first.
pub fn build_find_spec(
    watermark_field: Option<&str>,
    resume_point: Option<&ResumePoint>,
) -> Result<FindSpec> {
    let filter = match (watermark_field, resume_point) {
        (Some(field), Some(rp)) => Some(WatermarkFilter {
            field: field.to_string(),
            greater_than: rp.to_doc_value(),
        }),
        (None, Some(rp)) => {
            return Err(SyncError::SourceQuery(format!(
                "Resume point {rp} given without a watermark field"
            )));
        }
        (_, None) => None,
    };

    let sort = watermark_field.map(|field| SortSpec {
        field: field.to_string(),
        descending: true,
    });

    Ok(FindSpec {
        filter,
        sort,
        no_cursor_timeout: true,
    })
}

/// Open a stream over `database.collection`.
pub async fn open_stream<Src: DocumentSource + ?Sized>(
    source: &Src,
    database: &str,
    collection: &str,
    watermark_field: Option<&str>,
    resume_point: Option<&ResumePoint>,
) -> Result<CollectionStream> {
    let spec = build_find_spec(watermark_field, resume_point)?;
    let namespace = format!("{database}.{collection}");

    match (&spec.filter, &spec.sort) {
        (Some(f), _) => tracing::info!(
            "Streaming {namespace} where {} > {:?}",
            f.field,
            f.greater_than
        ),
        (None, Some(s)) => {
            tracing::info!("Streaming all of {namespace} ordered by {} desc", s.field)
        }
        (None, None) => tracing::info!("Streaming all of {namespace}"),
    }

    let cursor = source.find(database, collection, &spec).await?;
    Ok(CollectionStream::new(cursor, namespace))
}

/// Lazy, single-pass sequence of raw source documents.
pub struct CollectionStream {
    cursor: Option<Box<dyn DocumentCursor>>,
    namespace: String,
    yielded: u64,
}

impl CollectionStream {
    pub fn new(cursor: Box<dyn DocumentCursor>, namespace: String) -> Self {
        Self {
            cursor: Some(cursor),
            namespace,
            yielded: 0,
        }
    }

    /// Fetch the next document.
    ///
    /// Returns `None` once exhausted; the cursor is released at that point
    /// and every later call returns `None` again.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        match cursor.next_document().await {
            Ok(Some(doc)) => {
                self.yielded += 1;
                Ok(Some(doc))
            }
            Ok(None) => {
                tracing::debug!(
                    "Cursor on {} exhausted after {} documents",
                    self.namespace,
                    self.yielded
                );
                self.release();
                Ok(None)
            }
            Err(e) => {
                tracing::error!(
                    "Cursor on {} failed after {} documents: {e}",
                    self.namespace,
                    self.yielded
                );
                self.release();
                Err(e)
            }
        }
    }

    /// Number of documents yielded so far.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// Release the cursor without reading the rest of the stream.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            cursor.close();
        }
    }
}

impl Drop for CollectionStream {
    fn drop(&mut self) {
        if self.cursor.is_some() {
            tracing::debug!(
                "Releasing cursor on {} on drop after {} documents",
                self.namespace,
                self.yielded
            );
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use sync_core::DocValue;

    #[test]
    fn test_no_watermark_matches_all_unsorted() {
        let spec = build_find_spec(None, None).unwrap();
        assert_eq!(spec.filter, None);
        assert_eq!(spec.sort, None);
        assert!(spec.no_cursor_timeout);
    }

    #[test]
    fn test_watermark_without_resume_point_sorts_only() {
        let spec = build_find_spec(Some("ts"), None).unwrap();
        assert_eq!(spec.filter, None);
        assert_eq!(
            spec.sort,
            Some(SortSpec {
                field: "ts".to_string(),
                descending: true
            })
        );
    }

    #[test]
    fn test_resume_point_builds_strict_greater_than() {
        let dt = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let spec = build_find_spec(Some("updated_at"), Some(&ResumePoint::Timestamp(dt))).unwrap();
        assert_eq!(
            spec.filter,
            Some(WatermarkFilter {
                field: "updated_at".to_string(),
                greater_than: DocValue::Timestamp(dt),
            })
        );
        assert!(spec.no_cursor_timeout);
    }

    #[test]
    fn test_resume_point_without_field_is_rejected() {
        let err = build_find_spec(None, Some(&ResumePoint::Int64(1))).unwrap_err();
        assert!(matches!(err, SyncError::SourceQuery(_)));
    }
}
