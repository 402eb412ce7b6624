//! MongoDB export utilities for mongo-es-sync
//!
//! Streams one MongoDB collection into a search index, either in full or
//! incrementally from the highest watermark already indexed.
//!
//! The watermark approach cannot observe deletions: documents removed from
//! MongoDB stay in the index. Recreate the index and run a full export if the
//! two must match exactly.

mod mongo;
mod source;
mod stream;
mod sync;
pub mod testing;
mod watermark;

pub use mongo::{
    convert_bson_document, convert_bson_to_doc_value, doc_value_to_bson, MongoSource, SourceOpts,
};
pub use source::{DocumentCursor, DocumentSource, FindSpec, SortSpec, WatermarkFilter};
pub use stream::{build_find_spec, open_stream, CollectionStream};
pub use sync::{
    derive_index_name, SyncConfig, SyncDriver, SyncSummary, DEFAULT_PROGRESS_INTERVAL,
};
pub use watermark::{
    decode_watermark_value, resolve_resume_point, resume_point_query, ResumePoint, WatermarkConfig,
    WatermarkKind,
};
