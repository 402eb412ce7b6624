//! Resume point resolution.
//!
//! The index itself is the only durable sync state: the highest watermark
//! value already indexed is where the next incremental run picks up. It is
//! recomputed on every run rather than stored anywhere locally.
//!
//! The value is read from the top hit's `_source`, which holds exactly what
//! was indexed. Sort values are only a fallback: they come from the field
//! mapping, and a dynamically mapped `float` rounds doubles to 32 bits, which
//! can push the resume point past documents that were never exported.
//!
//! The configured [`WatermarkKind`] decides whether the value is turned back
//! into a timestamp or kept as a number before it is used in the source
//! query. Comparing a MongoDB date against a plain number would never match.

use chrono::{DateTime, SecondsFormat, Utc};
use es_sink::IndexSink;
use serde_json::{json, Value};
use std::fmt;
use sync_core::{DocValue, Result, SyncError};

/// How the watermark field is typed in the source collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatermarkKind {
    /// BSON dates; indexed as Elasticsearch `date`
    #[default]
    Timestamp,
    /// Integers or doubles
    Number,
}

impl WatermarkKind {
    /// Elasticsearch field type used when the index has no mapping yet.
    fn unmapped_type(self) -> &'static str {
        match self {
            Self::Timestamp => "date",
            Self::Number => "double",
        }
    }
}

impl fmt::Display for WatermarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp => write!(f, "timestamp"),
            Self::Number => write!(f, "number"),
        }
    }
}

/// The field that orders documents for incremental export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkConfig {
    pub field: String,
    pub kind: WatermarkKind,
}

impl WatermarkConfig {
    pub fn new(field: impl Into<String>, kind: WatermarkKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

/// Watermark value beyond which source documents are not yet indexed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResumePoint {
    Timestamp(DateTime<Utc>),
    Int64(i64),
    Float64(f64),
}

impl ResumePoint {
    /// The value to compare the source field against.
    pub fn to_doc_value(&self) -> DocValue {
        match self {
            Self::Timestamp(dt) => DocValue::Timestamp(*dt),
            Self::Int64(i) => DocValue::Int64(*i),
            Self::Float64(f) => DocValue::Float64(*f),
        }
    }
}

impl fmt::Display for ResumePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Int64(i) => write!(f, "{i}"),
            Self::Float64(x) => write!(f, "{x}"),
        }
    }
}

/// Query for the single indexed document with the highest watermark.
///
/// Documents without the field are excluded so they cannot hide the real
/// maximum behind a missing-value sort placeholder.
pub fn resume_point_query(watermark: &WatermarkConfig) -> Value {
    json!({
        "size": 1,
        "_source": [watermark.field],
        "query": { "exists": { "field": watermark.field } },
        "sort": [
            {
                watermark.field.as_str(): {
                    "order": "desc",
                    "unmapped_type": watermark.kind.unmapped_type(),
                }
            }
        ]
    })
}

/// Find where an incremental run should resume.
///
/// Returns `None` when nothing with the watermark field has been indexed
/// yet, in which case the run exports the whole collection.
pub async fn resolve_resume_point<S: IndexSink + ?Sized>(
    sink: &S,
    index: &str,
    doc_type: &str,
    watermark: &WatermarkConfig,
) -> Result<Option<ResumePoint>> {
    let query = resume_point_query(watermark);
    let response = sink.search(index, doc_type, &query).await?;

    let Some(hit) = response.hits.into_iter().next() else {
        tracing::info!(
            "No documents with '{}' in index '{index}'; running a full export",
            watermark.field
        );
        return Ok(None);
    };

    let indexed = match hit.source.as_ref().and_then(|src| source_field(src, &watermark.field)) {
        Some(value) => value.clone(),
        None => hit.sort.into_iter().next().ok_or_else(|| {
            SyncError::Sink(format!(
                "Search hit {} in '{index}' carries neither '{}' nor a sort value",
                hit.id.as_deref().unwrap_or("<unknown>"),
                watermark.field
            ))
        })?,
    };

    let resume_point = decode_watermark_value(&indexed, watermark.kind)?;
    tracing::info!(
        "Highest indexed '{}' in '{index}' is {resume_point}",
        watermark.field
    );
    Ok(Some(resume_point))
}

/// Look up `field` in a hit's `_source`, following dots into objects when
/// no top-level key has the full name.
fn source_field<'a>(source: &'a Value, field: &str) -> Option<&'a Value> {
    if let Some(value) = source.get(field) {
        return Some(value);
    }
    field
        .split('.')
        .try_fold(source, |current, segment| current.get(segment))
}

/// Decode an indexed watermark (from `_source` or a sort value) into a
/// resume point of the given kind.
pub fn decode_watermark_value(value: &Value, kind: WatermarkKind) -> Result<ResumePoint> {
    let undecodable =
        || SyncError::Sink(format!("Cannot decode indexed value {value} as a {kind} watermark"));

    match (kind, value) {
        (WatermarkKind::Timestamp, Value::Number(n)) => {
            let millis = match n.as_i64() {
                Some(millis) => millis,
                None => n.as_f64().ok_or_else(undecodable)?.trunc() as i64,
            };
            DateTime::from_timestamp_millis(millis)
                .map(ResumePoint::Timestamp)
                .ok_or_else(undecodable)
        }
        (WatermarkKind::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| ResumePoint::Timestamp(dt.with_timezone(&Utc)))
            .map_err(|_| undecodable()),
        (WatermarkKind::Number, Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(ResumePoint::Int64(i)),
            None => n.as_f64().map(ResumePoint::Float64).ok_or_else(undecodable),
        },
        _ => Err(undecodable()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use es_sink::testing::MemorySink;
    use es_sink::{SearchHit, SearchResponse};
    use sync_core::Document;

    /// Sink that answers every search with one fixed hit.
    struct FixedHitSink(SearchHit);

    #[async_trait]
    impl IndexSink for FixedHitSink {
        async fn ensure_index(&self, _index: &str) -> Result<()> {
            Ok(())
        }

        async fn upsert(
            &self,
            _index: &str,
            _doc_type: &str,
            _id: &str,
            _body: &Document,
        ) -> Result<()> {
            Ok(())
        }

        async fn search(
            &self,
            _index: &str,
            _doc_type: &str,
            _query: &Value,
        ) -> Result<SearchResponse> {
            Ok(SearchResponse {
                hits: vec![self.0.clone()],
            })
        }
    }

    fn ts_doc(field: &str, value: DocValue) -> Document {
        let mut doc = Document::new();
        doc.insert(field.to_string(), value);
        doc
    }

    #[test]
    fn test_query_shape() {
        let query = resume_point_query(&WatermarkConfig::new("updated_at", WatermarkKind::Timestamp));
        assert_eq!(
            query,
            json!({
                "size": 1,
                "_source": ["updated_at"],
                "query": {"exists": {"field": "updated_at"}},
                "sort": [{"updated_at": {"order": "desc", "unmapped_type": "date"}}]
            })
        );
    }

    #[test]
    fn test_decode_epoch_millis_as_timestamp() {
        let rp = decode_watermark_value(&json!(1_700_000_000_123i64), WatermarkKind::Timestamp).unwrap();
        assert_eq!(
            rp,
            ResumePoint::Timestamp(DateTime::from_timestamp_millis(1_700_000_000_123).unwrap())
        );
        assert_eq!(rp.to_string(), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn test_decode_rfc3339_string_as_timestamp() {
        let rp = decode_watermark_value(&json!("2024-01-01T00:00:00Z"), WatermarkKind::Timestamp)
            .unwrap();
        assert_eq!(
            rp.to_doc_value(),
            DocValue::Timestamp(DateTime::from_timestamp(1_704_067_200, 0).unwrap())
        );
    }

    #[test]
    fn test_decode_numbers() {
        assert_eq!(
            decode_watermark_value(&json!(150), WatermarkKind::Number).unwrap(),
            ResumePoint::Int64(150)
        );
        assert_eq!(
            decode_watermark_value(&json!(1.25), WatermarkKind::Number).unwrap(),
            ResumePoint::Float64(1.25)
        );
    }

    #[test]
    fn test_decode_rejects_mismatched_values() {
        assert!(decode_watermark_value(&json!(null), WatermarkKind::Timestamp).is_err());
        assert!(decode_watermark_value(&json!("abc"), WatermarkKind::Number).is_err());
        assert!(decode_watermark_value(&json!("yesterday"), WatermarkKind::Timestamp).is_err());
    }

    #[test]
    fn test_source_field_follows_dotted_paths() {
        let source = json!({"meta": {"ts": 5}, "a.b": 1});
        assert_eq!(source_field(&source, "meta.ts"), Some(&json!(5)));
        assert_eq!(source_field(&source, "a.b"), Some(&json!(1)));
        assert_eq!(source_field(&source, "meta.missing"), None);
    }

    #[tokio::test]
    async fn test_resolve_returns_none_for_empty_index() {
        let sink = MemorySink::new();
        sink.ensure_index("idx").await.unwrap();
        let wm = WatermarkConfig::new("ts", WatermarkKind::Number);

        let rp = resolve_resume_point(&sink, "idx", "orders", &wm).await.unwrap();
        assert_eq!(rp, None);
    }

    #[tokio::test]
    async fn test_resolve_returns_max_watermark() {
        let sink = MemorySink::new();
        sink.ensure_index("idx").await.unwrap();
        sink.insert("idx", "orders", "a", ts_doc("ts", DocValue::Int64(100)));
        sink.insert("idx", "orders", "b", ts_doc("ts", DocValue::Int64(150)));
        sink.insert("idx", "orders", "c", ts_doc("other", DocValue::Int64(999)));
        let wm = WatermarkConfig::new("ts", WatermarkKind::Number);

        let rp = resolve_resume_point(&sink, "idx", "orders", &wm).await.unwrap();
        assert_eq!(rp, Some(ResumePoint::Int64(150)));
    }

    #[tokio::test]
    async fn test_resolve_timestamp_watermark() {
        let sink = MemorySink::new();
        sink.ensure_index("idx").await.unwrap();
        let newest = DateTime::from_timestamp_millis(1_700_000_500_000).unwrap();
        let older = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        sink.insert("idx", "orders", "a", ts_doc("updated_at", older.into()));
        sink.insert("idx", "orders", "b", ts_doc("updated_at", newest.into()));
        let wm = WatermarkConfig::new("updated_at", WatermarkKind::Timestamp);

        let rp = resolve_resume_point(&sink, "idx", "orders", &wm).await.unwrap();
        assert_eq!(rp, Some(ResumePoint::Timestamp(newest)));
    }

    #[tokio::test]
    async fn test_resolve_surfaces_sink_errors() {
        let sink = MemorySink::new();
        let wm = WatermarkConfig::new("ts", WatermarkKind::Number);

        let err = resolve_resume_point(&sink, "missing", "orders", &wm)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Sink(_)));
    }

    #[tokio::test]
    async fn test_resolve_prefers_source_over_rounded_sort_value() {
        // A `float` mapping widens 0.3 to 0.30000001192092896 in sort values
        let sink = FixedHitSink(SearchHit {
            id: Some("a".to_string()),
            sort: vec![json!(0.30000001192092896)],
            source: Some(json!({"ts": 0.3})),
        });
        let wm = WatermarkConfig::new("ts", WatermarkKind::Number);

        let rp = resolve_resume_point(&sink, "idx", "orders", &wm).await.unwrap();
        assert_eq!(rp, Some(ResumePoint::Float64(0.3)));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_sort_value() {
        let sink = FixedHitSink(SearchHit {
            id: Some("a".to_string()),
            sort: vec![json!(1_700_000_000_000i64)],
            source: None,
        });
        let wm = WatermarkConfig::new("updated_at", WatermarkKind::Timestamp);

        let rp = resolve_resume_point(&sink, "idx", "orders", &wm).await.unwrap();
        assert_eq!(
            rp,
            Some(ResumePoint::Timestamp(
                DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
            ))
        );
    }

    #[tokio::test]
    async fn test_resolve_rejects_hit_without_value() {
        let sink = FixedHitSink(SearchHit {
            id: Some("a".to_string()),
            sort: vec![],
            source: Some(json!({})),
        });
        let wm = WatermarkConfig::new("ts", WatermarkKind::Number);

        let err = resolve_resume_point(&sink, "idx", "orders", &wm)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Sink(_)));
    }
}
