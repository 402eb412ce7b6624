//! Document sanitization.
//!
//! Before a document leaves the source side it is normalized for the sink:
//! top-level fields named in the [`Denylist`] are dropped, and every
//! [`ObjectId`](crate::ObjectId) anywhere in the tree is replaced by its hex
//! string. Nothing else is touched, so sanitizing twice gives the same result
//! as sanitizing once.
//!
//! Denylist matching is exact key equality. A denylist entry `secret` drops
//! the field `secret` but keeps `secret_hint`.

use crate::error::{Result, SyncError};
use crate::values::{DocValue, Document};
use std::collections::HashSet;

/// Deepest nesting the sanitizer walks before rejecting the input.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Set of top-level field names excluded from indexed documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Denylist {
    fields: HashSet<String>,
}

impl Denylist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

impl<S: Into<String>> FromIterator<S> for Denylist {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Sanitize a top-level value.
///
/// Documents have their denylisted keys removed and their identifiers
/// normalized. Arrays have no keys, so only identifiers are normalized.
/// Any other top-level value is rejected with [`SyncError::TypeInput`].
pub fn sanitize(value: DocValue, denylist: &Denylist) -> Result<DocValue> {
    match value {
        DocValue::Object(doc) => Ok(DocValue::Object(sanitize_document(doc, denylist)?)),
        DocValue::Array(mut values) => {
            for v in values.iter_mut() {
                visit_mut(v, 1, &mut stringify_object_id)?;
            }
            Ok(DocValue::Array(values))
        }
        other => Err(SyncError::TypeInput(format!(
            "expected a document or array at the top level, got {}",
            other.type_name()
        ))),
    }
}

/// Sanitize a document in place and hand it back.
pub fn sanitize_document(mut doc: Document, denylist: &Denylist) -> Result<Document> {
    if !denylist.is_empty() {
        doc.retain(|key, _| {
            let keep = !denylist.contains(key);
            if !keep {
                tracing::trace!("Dropping denylisted field '{key}'");
            }
            keep
        });
    }

    for value in doc.values_mut() {
        visit_mut(value, 1, &mut stringify_object_id)?;
    }

    Ok(doc)
}

/// Walk `value` depth-first, calling `visit` on every node before its
/// children.
fn visit_mut<F>(value: &mut DocValue, depth: usize, visit: &mut F) -> Result<()>
where
    F: FnMut(&mut DocValue),
{
    if depth > MAX_NESTING_DEPTH {
        return Err(SyncError::TypeInput(format!(
            "document nesting exceeds {MAX_NESTING_DEPTH} levels"
        )));
    }

    visit(value);

    match value {
        DocValue::Object(doc) => {
            for child in doc.values_mut() {
                visit_mut(child, depth + 1, visit)?;
            }
        }
        DocValue::Array(values) => {
            for child in values.iter_mut() {
                visit_mut(child, depth + 1, visit)?;
            }
        }
        _ => {}
    }

    Ok(())
}

fn stringify_object_id(value: &mut DocValue) {
    if let DocValue::ObjectId(oid) = value {
        *value = DocValue::Text(oid.to_hex());
    }
}
