use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod aws;
pub mod bulk;
pub mod elastic;
pub mod http;
pub mod local;
pub mod opensearch;

pub use bulk::{index_documents, BulkBackend, BulkIndexer, BulkIndexerConfig, IndexingStats};
pub use elastic::ElasticIndexer;
pub use local::LocalIndexer;
pub use opensearch::OpenSearchIndexer;

pub struct IndexerType;

impl IndexerType {
    pub const LOCAL: &'static str = "local";
    pub const ELASTIC: &'static str = "elastic";
    pub const OPENSEARCH: &'static str = "opensearch";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexerConfig {
    #[serde(rename = "type")]
    pub indexer_type: String,
    pub servers: Vec<String>,
    pub index: String,
    pub insecure_skip_verify: bool,
    pub metrics_directory: PathBuf,
    /// OpenSearch Serverless collection, signed for `aoss`.
    pub serverless: bool,
    /// Sign OpenSearch requests with the default AWS credentials.
    pub aws_auth: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexingOpts {
    pub metric_name: String,
    pub job_name: String,
}

impl IndexingOpts {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            job_name: String::new(),
        }
    }

    pub fn with_job(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = job_name.into();
        self
    }
}

#[derive(Debug, Clone)]
pub enum Indexer {
    Local(LocalIndexer),
    Elastic(ElasticIndexer),
    OpenSearch(OpenSearchIndexer),
}

impl Indexer {
    pub async fn new(config: &IndexerConfig) -> Result<Self> {
        match config.indexer_type.as_str() {
            IndexerType::LOCAL => Ok(Self::Local(LocalIndexer::new(&config.metrics_directory)?)),
            IndexerType::ELASTIC => Ok(Self::Elastic(ElasticIndexer::new(config).await?)),
            IndexerType::OPENSEARCH => Ok(Self::OpenSearch(OpenSearchIndexer::new(config).await?)),
            other => Err(Error::Config(format!("Indexer not found: {other}"))),
        }
    }

    /// Indexes `documents` and returns a one-line summary of the outcome.
    pub async fn index<T: Serialize>(&self, documents: &[T], opts: &IndexingOpts) -> Result<String> {
        match self {
            Self::Local(i) => i.index(documents, opts),
            Self::Elastic(i) => i.index(documents, opts).await,
            Self::OpenSearch(i) => i.index(documents, opts).await,
        }
    }
}
