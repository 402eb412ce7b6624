//! Core types for the mongo-es-sync framework.
//!
//! This crate provides the source- and sink-independent pieces shared by
//! every other crate in the workspace:
//!
//! - [`DocValue`] / [`Document`] - Tagged-variant document model
//! - [`ObjectId`] - Opaque source identifier with a canonical string form
//! - [`Denylist`] - Exact-match set of top-level fields to drop
//! - [`sanitize`] / [`sanitize_document`] - In-flight document normalization
//! - [`SyncError`] - Error taxonomy for a sync run
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── es-sink          (encodes Documents as JSON bodies)
//!    └─── mongodb-source   (decodes BSON into Documents, drives the sync)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sync_core::{sanitize_document, Denylist, DocValue, Document, ObjectId};
//!
//! let mut doc = Document::new();
//! doc.insert("_id".to_string(), DocValue::ObjectId(ObjectId::from_bytes([7; 12])));
//! doc.insert("secret".to_string(), DocValue::Text("x".to_string()));
//!
//! let clean = sanitize_document(doc, &Denylist::from_iter(["secret"])).unwrap();
//! assert!(!clean.contains_key("secret"));
//! assert_eq!(clean["_id"], DocValue::Text("070707070707070707070707".to_string()));
//! ```

pub mod error;
pub mod sanitize;
pub mod values;

// Re-exports for convenience
pub use error::{Result, SyncError};
pub use sanitize::{sanitize, sanitize_document, Denylist, MAX_NESTING_DEPTH};
pub use values::{DocValue, Document, ObjectId};
