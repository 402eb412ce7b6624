//! mongo-es-sync Library
//!
//! A tool for exporting a MongoDB collection into an Elasticsearch index.
//!
//! # Features
//!
//! - Full export: every document of the collection is indexed by its `_id`
//! - Incremental export: resume after the highest watermark already indexed
//! - Field denylist: drop sensitive top-level fields before indexing
//!
//! # Crates
//!
//! - `sync_core` - document model, sanitizer and error types
//! - `es_sink` - the `IndexSink` seam and its Elasticsearch implementation
//! - `mongo_es_sync_mongodb_source` - MongoDB source, resume point resolution
//!   and the sync driver
//!
//! # CLI Usage
//!
//! ```bash
//! # Full export
//! mongo-es-sync --database shop --collection orders --denylist password
//!
//! # Incremental export on a date field
//! mongo-es-sync --database shop --collection orders --watermark-field updated_at
//! ```

use clap::{Args, ValueEnum};
use es_sink::ElasticsearchOpts;
use mongo_es_sync_mongodb_source::{SyncConfig, WatermarkConfig, WatermarkKind};
use sync_core::Denylist;

#[derive(Args, Clone, Debug)]
pub struct MongoOpts {
    /// MongoDB host
    #[arg(long, default_value = "localhost", env = "MONGO_HOST")]
    pub mongo_host: String,

    /// MongoDB port
    #[arg(long, default_value = "27017", env = "MONGO_PORT")]
    pub mongo_port: u16,

    /// MongoDB connection URI; overrides host and port
    #[arg(long, env = "MONGO_URI")]
    pub mongo_uri: Option<String>,

    /// Source database
    #[arg(long, env = "MONGO_DATABASE")]
    pub database: String,

    /// Source collection
    #[arg(long, env = "MONGO_COLLECTION")]
    pub collection: String,
}

impl MongoOpts {
    pub fn connection_uri(&self) -> String {
        match &self.mongo_uri {
            Some(uri) => uri.clone(),
            None => format!("mongodb://{}:{}", self.mongo_host, self.mongo_port),
        }
    }
}

// CLI type → MongoDB source library type conversion
impl From<&MongoOpts> for mongo_es_sync_mongodb_source::SourceOpts {
    fn from(opts: &MongoOpts) -> Self {
        Self {
            source_uri: opts.connection_uri(),
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct ElasticsearchArgs {
    /// Elasticsearch host, optionally with a scheme, port or path prefix
    #[arg(long, default_value = "localhost", env = "ES_HOST")]
    pub elasticsearch_host: String,

    /// Elasticsearch port
    #[arg(long, default_value = "9200", env = "ES_PORT")]
    pub elasticsearch_port: u16,

    /// Elasticsearch username
    #[arg(long, env = "ES_USERNAME")]
    pub elasticsearch_username: Option<String>,

    /// Elasticsearch password
    #[arg(long, env = "ES_PASSWORD")]
    pub elasticsearch_password: Option<String>,

    /// Use /{index}/_doc paths (Elasticsearch 7 and later)
    #[arg(long)]
    pub no_mapping_types: bool,
}

impl ElasticsearchArgs {
    /// Base URL of the cluster.
    ///
    /// The host may be a bare name, `host:port`, or a full URL. The port
    /// option only applies when the host does not carry its own.
    pub fn url(&self) -> String {
        let host = self.elasticsearch_host.trim_end_matches('/');
        let (scheme, rest) = host.split_once("://").unwrap_or(("http", host));
        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        if has_port(authority) {
            format!("{scheme}://{authority}{path}")
        } else {
            format!("{scheme}://{authority}:{}{path}", self.elasticsearch_port)
        }
    }
}

/// `true` for `host:9200` and `[::1]:9200`, `false` for `host` and `[::1]`.
fn has_port(authority: &str) -> bool {
    authority.rsplit_once(':').is_some_and(|(host, port)| {
        !port.is_empty()
            && port.bytes().all(|b| b.is_ascii_digit())
            && (!host.starts_with('[') || host.ends_with(']'))
    })
}

// CLI type → Elasticsearch sink library type conversion
impl From<&ElasticsearchArgs> for ElasticsearchOpts {
    fn from(args: &ElasticsearchArgs) -> Self {
        Self {
            url: args.url(),
            username: args.elasticsearch_username.clone(),
            password: args.elasticsearch_password.clone(),
            mapping_types: !args.no_mapping_types,
            ..Default::default()
        }
    }
}

/// How the watermark field is stored in MongoDB
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WatermarkKindArg {
    /// BSON dates
    #[default]
    Timestamp,
    /// Integers or doubles
    Number,
}

impl From<WatermarkKindArg> for WatermarkKind {
    fn from(kind: WatermarkKindArg) -> Self {
        match kind {
            WatermarkKindArg::Timestamp => WatermarkKind::Timestamp,
            WatermarkKindArg::Number => WatermarkKind::Number,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct ExportOpts {
    /// Target index; defaults to mongodb-{database}-{collection}
    #[arg(long, env = "ES_INDEX")]
    pub index: Option<String>,

    /// Field used to resume incremental exports
    #[arg(long, env = "WATERMARK_FIELD")]
    pub watermark_field: Option<String>,

    /// Type of the watermark field
    #[arg(long, value_enum, default_value_t, env = "WATERMARK_KIND")]
    pub watermark_kind: WatermarkKindArg,

    /// Top-level fields to drop before indexing
    #[arg(
        long,
        alias = "blacklist",
        num_args = 1..,
        value_delimiter = ',',
        env = "MONGO_BLACKLIST"
    )]
    pub denylist: Vec<String>,

    /// Dry run mode - stream and sanitize but don't write documents
    #[arg(long)]
    pub dry_run: bool,

    /// Log progress every this many documents (0 disables)
    #[arg(long, default_value = "1000")]
    pub progress_interval: u64,
}

impl ExportOpts {
    pub fn denylist(&self) -> Denylist {
        self.denylist
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect()
    }

    pub fn to_sync_config(&self, mongo: &MongoOpts) -> SyncConfig {
        let mut config = SyncConfig::new(&mongo.database, &mongo.collection);
        config.index = self.index.clone();
        config.denylist = self.denylist();
        config.watermark = self
            .watermark_field
            .as_ref()
            .map(|field| WatermarkConfig::new(field, self.watermark_kind.into()));
        config.dry_run = self.dry_run;
        config.progress_interval = self.progress_interval;
        config
    }
}
