use chrono::DateTime;
use es_sink::testing::MemorySink;
use es_sink::IndexSink;
use serde_json::json;
use sync_core::{DocValue, Document, ObjectId};

fn doc(pairs: Vec<(&str, DocValue)>) -> Document {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[tokio::test]
async fn test_search_returns_max_sort_value_first() {
    let sink = MemorySink::new();
    sink.ensure_index("idx").await.unwrap();
    for (id, ts) in [("a", 100i64), ("b", 300), ("c", 200)] {
        sink.upsert("idx", "orders", id, &doc(vec![("ts", ts.into())]))
            .await
            .unwrap();
    }

    let query = json!({
        "size": 1,
        "query": {"exists": {"field": "ts"}},
        "sort": [{"ts": {"order": "desc"}}]
    });
    let response = sink.search("idx", "orders", &query).await.unwrap();

    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].id.as_deref(), Some("b"));
    assert_eq!(response.hits[0].sort, vec![json!(300)]);
}

#[tokio::test]
async fn test_search_reports_timestamps_as_epoch_millis() {
    let sink = MemorySink::new();
    sink.ensure_index("idx").await.unwrap();
    let ts = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
    sink.upsert("idx", "t", "x", &doc(vec![("updated_at", ts.into())]))
        .await
        .unwrap();

    let query = json!({"size": 1, "sort": [{"updated_at": {"order": "desc"}}]});
    let response = sink.search("idx", "t", &query).await.unwrap();
    assert_eq!(response.hits[0].sort, vec![json!(1_700_000_000_123i64)]);
}

#[tokio::test]
async fn test_search_returns_requested_source_fields() {
    let sink = MemorySink::new();
    sink.ensure_index("idx").await.unwrap();
    sink.insert(
        "idx",
        "orders",
        "a",
        doc(vec![("ts", 0.3.into()), ("name", "kept out".into())]),
    );

    let query = json!({"size": 1, "_source": ["ts"], "sort": [{"ts": {"order": "desc"}}]});
    let response = sink.search("idx", "orders", &query).await.unwrap();
    assert_eq!(response.hits[0].source, Some(json!({"ts": 0.3})));

    let query = json!({"size": 1});
    let response = sink.search("idx", "orders", &query).await.unwrap();
    assert_eq!(
        response.hits[0].source,
        Some(json!({"ts": 0.3, "name": "kept out"}))
    );
}

#[tokio::test]
async fn test_search_filters_by_doc_type_and_exists() {
    let sink = MemorySink::new();
    sink.ensure_index("idx").await.unwrap();
    sink.insert("idx", "other", "a", doc(vec![("ts", 999i64.into())]));
    sink.insert("idx", "orders", "b", doc(vec![("name", "no ts".into())]));

    let query = json!({
        "size": 1,
        "query": {"exists": {"field": "ts"}},
        "sort": [{"ts": {"order": "desc"}}]
    });
    let response = sink.search("idx", "orders", &query).await.unwrap();
    assert!(response.hits.is_empty());
    assert_eq!(sink.search_count(), 1);
}

#[tokio::test]
async fn test_upsert_replaces_by_id() {
    let sink = MemorySink::new();
    sink.ensure_index("idx").await.unwrap();
    sink.upsert("idx", "t", "1", &doc(vec![("v", 1i64.into())]))
        .await
        .unwrap();
    sink.upsert("idx", "t", "1", &doc(vec![("v", 2i64.into())]))
        .await
        .unwrap();

    let docs = sink.documents("idx");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs["1"].body["v"], DocValue::Int64(2));
    assert_eq!(sink.upserted_ids(), vec!["1", "1"]);
}

#[tokio::test]
async fn test_upsert_into_missing_index_fails() {
    let sink = MemorySink::new();
    let err = sink
        .upsert("nope", "t", "1", &Document::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no such index"));
}

#[test]
fn test_document_json_body() {
    let ts = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
    let body = doc(vec![
        ("name", "alice".into()),
        ("age", 30i64.into()),
        ("score", 1.5f64.into()),
        ("nan", f64::NAN.into()),
        ("active", true.into()),
        ("missing", DocValue::Null),
        ("created", ts.into()),
        ("owner", ObjectId::from_bytes([1; 12]).into()),
        (
            "tags",
            DocValue::Array(vec!["a".into(), doc(vec![("k", 1i64.into())]).into()]),
        ),
    ]);

    let json = serde_json::to_string(&body).unwrap();
    assert_eq!(
        json,
        r#"{"name":"alice","age":30,"score":1.5,"nan":null,"active":true,"missing":null,"created":"2023-11-14T22:13:20.000Z","owner":"010101010101010101010101","tags":["a",{"k":1}]}"#
    );
}
