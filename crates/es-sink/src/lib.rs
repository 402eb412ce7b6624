//! Search index sink abstraction.
//!
//! This crate defines the `IndexSink` trait that the sync driver writes
//! through, plus two implementations:
//!
//! - `ElasticsearchSink` talks to an Elasticsearch cluster over its REST API
//! - `testing::MemorySink` keeps documents in memory for tests
//!
//! The trait uses sync-core `Document`s so source crates never depend on a
//! particular search client.

mod elasticsearch;
pub mod testing;
mod traits;

pub use elasticsearch::{ElasticsearchOpts, ElasticsearchSink};
pub use traits::{IndexSink, SearchHit, SearchResponse};
