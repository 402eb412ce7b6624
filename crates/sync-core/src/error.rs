//! Error types for a sync run.
//!
//! Every variant is fatal to the run that produced it. The only sink
//! condition that is swallowed ("index already exists") never becomes an
//! error in the first place.

use thiserror::Error;

/// Errors that can occur while exporting a collection.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or invalid run configuration (e.g. empty database name).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The source query could not be built or executed.
    #[error("Source query error: {0}")]
    SourceQuery(String),

    /// The source cursor failed mid-stream.
    #[error("Source stream error: {0}")]
    SourceStream(String),

    /// Destination connectivity, index creation, upsert or search failure.
    #[error("Sink error: {0}")]
    Sink(String),

    /// The sanitizer was given a value it cannot walk.
    #[error("Type input error: {0}")]
    TypeInput(String),

    /// A source document has no `_id` field.
    #[error("Document is missing _id field")]
    MissingDocumentId,

    /// A source document has an `_id` that cannot become an index id.
    #[error("Unsupported _id type: {type_name}")]
    UnsupportedDocumentId { type_name: &'static str },

    /// The run was stopped by the operator.
    #[error("Sync cancelled")]
    Cancelled,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
