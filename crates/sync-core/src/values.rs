//! Document value representation for mongo-es-sync.
//!
//! Source documents are decoded into [`DocValue`] trees before they are
//! sanitized and handed to a sink. The model is deliberately small: it
//! covers what a search index can store, plus the one source-native type
//! ([`ObjectId`]) that must be normalized away before indexing.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Ordered mapping from field name to value.
///
/// Field order is preserved from the source so that indexed bodies read the
/// same way as the stored documents.
pub type Document = IndexMap<String, DocValue>;

/// Opaque 12-byte document identifier generated by the source database.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Canonical string form: 24 lower-case hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

/// A single value inside a [`Document`].
#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
    /// Point in time, always UTC
    Timestamp(DateTime<Utc>),
    Array(Vec<DocValue>),
    Object(Document),
    /// Source-native identifier; never reaches a sink after sanitization
    ObjectId(ObjectId),
}

impl DocValue {
    /// Try to get this value as an f64, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float64(f) => Some(*f),
            Self::Int64(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a nested document.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Object(doc) => Some(doc),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int64(_) => "int64",
            Self::Float64(_) => "float64",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::ObjectId(_) => "objectid",
        }
    }

    /// Order two scalar values the way a watermark comparison would.
    ///
    /// Numbers compare across Int64/Float64. Every other pairing compares
    /// only within the same variant; mismatched or non-scalar pairs yield
    /// `None`.
    pub fn partial_cmp_scalar(&self, other: &DocValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Int64(_) | Self::Float64(_), Self::Int64(_) | Self::Float64(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::ObjectId(a), Self::ObjectId(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<bool> for DocValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for DocValue {
    fn from(i: i64) -> Self {
        Self::Int64(i)
    }
}

impl From<f64> for DocValue {
    fn from(f: f64) -> Self {
        Self::Float64(f)
    }
}

impl From<&str> for DocValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for DocValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<DateTime<Utc>> for DocValue {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::Timestamp(dt)
    }
}

impl From<ObjectId> for DocValue {
    fn from(oid: ObjectId) -> Self {
        Self::ObjectId(oid)
    }
}

impl From<Document> for DocValue {
    fn from(doc: Document) -> Self {
        Self::Object(doc)
    }
}

impl From<Vec<DocValue>> for DocValue {
    fn from(values: Vec<DocValue>) -> Self {
        Self::Array(values)
    }
}

/// Serializes to the JSON shape a search index expects.
///
/// Timestamps become RFC 3339 strings with millisecond precision, object ids
/// become their hex form, and non-finite floats become `null`.
impl Serialize for DocValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int64(i) => serializer.serialize_i64(*i),
            Self::Float64(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float64(_) => serializer.serialize_unit(),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Timestamp(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Self::Array(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for v in values {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Self::Object(doc) => {
                let mut map = serializer.serialize_map(Some(doc.len()))?;
                for (k, v) in doc {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::ObjectId(oid) => serializer.serialize_str(&oid.to_hex()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex() {
        let oid = ObjectId::from_bytes([
            0x65, 0x0f, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f, 0x70, 0x81, 0x92, 0xa3,
        ]);
        assert_eq!(oid.to_hex(), "650f1a2b3c4d5e6f708192a3");
        assert_eq!(oid.to_string(), oid.to_hex());
        assert_eq!(format!("{oid:?}"), "ObjectId(650f1a2b3c4d5e6f708192a3)");
    }

    #[test]
    fn test_partial_cmp_scalar() {
        use DocValue::*;
        assert_eq!(Int64(1).partial_cmp_scalar(&Int64(2)), Some(Ordering::Less));
        assert_eq!(
            Int64(3).partial_cmp_scalar(&Float64(2.5)),
            Some(Ordering::Greater)
        );
        let t1 = DateTime::from_timestamp_millis(1_000).unwrap();
        let t2 = DateTime::from_timestamp_millis(2_000).unwrap();
        assert_eq!(
            Timestamp(t2).partial_cmp_scalar(&Timestamp(t1)),
            Some(Ordering::Greater)
        );
        // Mixed kinds never compare
        assert_eq!(Timestamp(t1).partial_cmp_scalar(&Int64(1_000)), None);
        assert_eq!(Null.partial_cmp_scalar(&Null), None);
    }

    #[test]
    fn test_accessors() {
        assert_eq!(DocValue::Int64(7).as_f64(), Some(7.0));
        assert_eq!(DocValue::from("a").as_f64(), None);
        assert_eq!(DocValue::Array(vec![]).type_name(), "array");
    }
}
