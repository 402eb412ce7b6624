//! MongoDB implementation of [`DocumentSource`].

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, Bson};
use mongodb::{options::ClientOptions, Client as MongoClient, Cursor};
use std::time::Duration;
use sync_core::{DocValue, Document, ObjectId, Result, SyncError};

use crate::source::{DocumentCursor, DocumentSource, FindSpec, WatermarkFilter};

/// Source database connection options (MongoDB-specific, library type without clap)
#[derive(Clone, Debug)]
pub struct SourceOpts {
    pub source_uri: String,
}

/// Reads documents from a MongoDB deployment.
pub struct MongoSource {
    client: MongoClient,
}

impl MongoSource {
    /// Parse the connection URI and create a client.
    ///
    /// The driver connects lazily, so an unreachable server surfaces on the
    /// first `find` as a `SourceQuery` error.
    pub async fn connect(opts: &SourceOpts) -> Result<Self> {
        tracing::debug!(
            "About to parse MongoDB connection options from URI: {}",
            opts.source_uri
        );
        let mut mongo_options = ClientOptions::parse(&opts.source_uri)
            .await
            .map_err(|e| {
                SyncError::Configuration(format!("Failed to parse MongoDB connection options: {e}"))
            })?;
        // Add connection timeout to prevent hanging
        mongo_options.connect_timeout = Some(Duration::from_secs(10));
        mongo_options.server_selection_timeout = Some(Duration::from_secs(10));

        let client = MongoClient::with_options(mongo_options)
            .map_err(|e| SyncError::SourceQuery(format!("Failed to create MongoDB client: {e}")))?;
        tracing::debug!("MongoDB client created successfully");

        Ok(Self { client })
    }

    /// Shut the client down after all cursors have been released.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

#[async_trait]
impl DocumentSource for MongoSource {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        spec: &FindSpec,
    ) -> Result<Box<dyn DocumentCursor>> {
        let namespace = format!("{database}.{collection}");
        let coll = self
            .client
            .database(database)
            .collection::<bson::Document>(collection);

        let filter = spec
            .filter
            .as_ref()
            .map(watermark_filter)
            .unwrap_or_default();
        tracing::debug!("Opening cursor on {namespace} with filter {filter}");

        let mut find = coll.find(filter).no_cursor_timeout(spec.no_cursor_timeout);
        if let Some(sort) = &spec.sort {
            let mut sort_doc = bson::Document::new();
            sort_doc.insert(sort.field.clone(), if sort.descending { -1i32 } else { 1i32 });
            find = find.sort(sort_doc);
        }

        let cursor = find.await.map_err(|e| {
            SyncError::SourceQuery(format!("Failed to query MongoDB collection {namespace}: {e}"))
        })?;

        Ok(Box::new(MongoCursor { cursor, namespace }))
    }
}

/// `{field: {$gt: value}}`.
///
/// A timestamp resume point also matches BSON `Timestamp` fields. Those are
/// indexed as dates, and `$gt` never compares across BSON types, so a date
/// alone would select nothing on the next run. Timestamp increments only
/// survive indexing down to the millisecond, so documents in that last
/// millisecond may be sent again.
fn watermark_filter(filter: &WatermarkFilter) -> bson::Document {
    let gt = |value: Bson| {
        let mut predicate = bson::Document::new();
        predicate.insert("$gt", value);
        let mut clause = bson::Document::new();
        clause.insert(filter.field.clone(), predicate);
        clause
    };

    match &filter.greater_than {
        DocValue::Timestamp(dt) => match u32::try_from(dt.timestamp()) {
            Ok(time) => {
                let as_timestamp = Bson::Timestamp(bson::Timestamp {
                    time,
                    increment: dt.timestamp_subsec_nanos(),
                });
                let mut either = bson::Document::new();
                either.insert(
                    "$or",
                    vec![
                        Bson::Document(gt(doc_value_to_bson(&filter.greater_than))),
                        Bson::Document(gt(as_timestamp)),
                    ],
                );
                either
            }
            // Before the epoch no BSON Timestamp can be smaller
            Err(_) => gt(doc_value_to_bson(&filter.greater_than)),
        },
        other => gt(doc_value_to_bson(other)),
    }
}

struct MongoCursor {
    cursor: Cursor<bson::Document>,
    namespace: String,
}

#[async_trait]
impl DocumentCursor for MongoCursor {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        let next = self.cursor.try_next().await.map_err(|e| {
            SyncError::SourceStream(format!("Cursor on {} failed: {e}", self.namespace))
        })?;
        next.map(convert_bson_document).transpose()
    }

    fn close(self: Box<Self>) {
        // Dropping a live driver cursor issues killCursors in the background
        tracing::debug!("Closing cursor on {}", self.namespace);
        drop(self);
    }
}

/// Convert a BSON document into a sync-core [`Document`], keeping field order.
pub fn convert_bson_document(doc: bson::Document) -> Result<Document> {
    doc.into_iter()
        .map(|(key, value)| convert_bson_to_doc_value(value).map(|v| (key, v)))
        .collect()
}

/// Convert a BSON value into a [`DocValue`].
pub fn convert_bson_to_doc_value(bson_value: Bson) -> Result<DocValue> {
    match bson_value {
        Bson::Double(f) => Ok(DocValue::Float64(f)),
        Bson::String(s) => Ok(DocValue::Text(s)),
        Bson::Array(arr) => Ok(DocValue::Array(
            arr.into_iter()
                .map(convert_bson_to_doc_value)
                .collect::<Result<_>>()?,
        )),
        Bson::Document(doc) => Ok(DocValue::Object(convert_bson_document(doc)?)),
        Bson::Boolean(b) => Ok(DocValue::Bool(b)),
        Bson::Null | Bson::Undefined => Ok(DocValue::Null),
        Bson::RegularExpression(regex) => {
            // /PATTERN/OPTIONS in MongoDB is (?OPTIONS)PATTERN in most regex engines
            Ok(DocValue::Text(format!("(?{}){}", regex.options, regex.pattern)))
        }
        Bson::JavaScriptCode(code) => Ok(DocValue::Text(code)),
        Bson::JavaScriptCodeWithScope(code_with_scope) => {
            let mut result = Document::new();
            result.insert("$code".to_string(), DocValue::Text(code_with_scope.code));
            result.insert(
                "$scope".to_string(),
                DocValue::Object(convert_bson_document(code_with_scope.scope)?),
            );
            Ok(DocValue::Object(result))
        }
        Bson::Int32(i) => Ok(DocValue::Int64(i as i64)),
        Bson::Int64(i) => Ok(DocValue::Int64(i)),
        Bson::Timestamp(ts) => {
            // To keep the ordering across timestamps, the increment is used as nanoseconds
            chrono::DateTime::from_timestamp(ts.time as i64, ts.increment)
                .map(DocValue::Timestamp)
                .ok_or_else(|| {
                    SyncError::SourceStream(format!(
                        "Failed to convert MongoDB timestamp {ts:?} to datetime"
                    ))
                })
        }
        Bson::Binary(binary) => {
            use base64::{engine::general_purpose, Engine as _};
            Ok(DocValue::Text(general_purpose::STANDARD.encode(binary.bytes)))
        }
        Bson::ObjectId(oid) => Ok(DocValue::ObjectId(ObjectId::from_bytes(oid.bytes()))),
        Bson::DateTime(dt) => Ok(DocValue::Timestamp(dt.to_chrono())),
        Bson::Symbol(s) => Ok(DocValue::Text(s)),
        Bson::Decimal128(d) => {
            let decimal_str = d.to_string();
            decimal_str
                .parse::<f64>()
                .map(DocValue::Float64)
                .map_err(|e| {
                    SyncError::SourceStream(format!(
                        "Failed to parse BSON Decimal128 '{decimal_str}': {e}"
                    ))
                })
        }
        Bson::MaxKey => Ok(marker_object("$maxKey")),
        Bson::MinKey => Ok(marker_object("$minKey")),
        // DBPointer is deprecated and its fields are private
        Bson::DbPointer(_) => Ok(DocValue::Text("$dbPointer".to_string())),
    }
}

fn marker_object(key: &str) -> DocValue {
    let mut doc = Document::new();
    doc.insert(key.to_string(), DocValue::Int64(1));
    DocValue::Object(doc)
}

/// Convert a [`DocValue`] back into BSON, e.g. to build a query predicate.
pub fn doc_value_to_bson(value: &DocValue) -> Bson {
    match value {
        DocValue::Null => Bson::Null,
        DocValue::Bool(b) => Bson::Boolean(*b),
        DocValue::Int64(i) => Bson::Int64(*i),
        DocValue::Float64(f) => Bson::Double(*f),
        DocValue::Text(s) => Bson::String(s.clone()),
        DocValue::Timestamp(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
        DocValue::Array(values) => Bson::Array(values.iter().map(doc_value_to_bson).collect()),
        DocValue::Object(doc) => Bson::Document(
            doc.iter()
                .map(|(k, v)| (k.clone(), doc_value_to_bson(v)))
                .collect(),
        ),
        DocValue::ObjectId(oid) => Bson::ObjectId(bson::oid::ObjectId::from_bytes(oid.bytes())),
    }
}
