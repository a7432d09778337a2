use std::sync::Arc;

use reqwest::StatusCode;
use serde::Serialize;

use super::bulk::{index_documents, BulkIndexerConfig};
use super::http::{parse_servers, HttpTransport};
use super::{IndexerConfig, IndexingOpts};
use crate::error::{Error, Result};

pub const SERVER_ENV: &str = "ELASTICSEARCH_URL";

#[derive(Debug, Clone)]
pub struct ElasticIndexer {
    transport: HttpTransport,
    index: String,
}

fn env_servers() -> Vec<String> {
    std::env::var(SERVER_ENV)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl ElasticIndexer {
    /// Connects, checks the cluster answers, and creates the index if needed.
    /// Falls back to `ELASTICSEARCH_URL` when no server is configured.
    #[tracing::instrument(skip_all, fields(index = %config.index))]
    pub async fn new(config: &IndexerConfig) -> Result<Self> {
        if config.index.is_empty() {
            return Err(Error::Config("index name not specified".to_string()));
        }
        let index = config.index.to_lowercase();

        let servers = if config.servers.is_empty() {
            env_servers()
        } else {
            config.servers.clone()
        };
        let transport = HttpTransport::new(
            parse_servers(&servers, "ES")?,
            config.insecure_skip_verify,
            None,
        )?;

        let status = transport.status(reqwest::Method::GET, "").await?;
        if status != StatusCode::OK {
            return Err(Error::Backend(format!(
                "unexpected ES status code: {}",
                status.as_u16()
            )));
        }

        transport.ensure_index(&index, "ES").await?;
        Ok(Self { transport, index })
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    pub async fn index<T: Serialize>(&self, documents: &[T], _opts: &IndexingOpts) -> Result<String> {
        let stats = index_documents(
            Arc::new(self.transport.clone()),
            BulkIndexerConfig::new(&self.index),
            documents,
        )
        .await?;
        Ok(stats.to_string())
    }
}
