use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::Serialize;

use super::aws::AwsSigner;
use super::bulk::{index_documents, BulkIndexerConfig};
use super::http::{parse_servers, HttpTransport};
use super::{IndexerConfig, IndexingOpts};
use crate::error::{Error, Result};

pub const SERVER_ENV: &str = "OPENSEARCH_URL";

const MANAGED_SERVICE: &str = "es";
const SERVERLESS_SERVICE: &str = "aoss";

#[derive(Debug, Clone)]
pub struct OpenSearchIndexer {
    transport: HttpTransport,
    index: String,
}

impl OpenSearchIndexer {
    /// Serverless collections are always SigV4 signed and only answer a ping;
    /// regular domains must report cluster health.
    #[tracing::instrument(skip_all, fields(index = %config.index, serverless = config.serverless))]
    pub async fn new(config: &IndexerConfig) -> Result<Self> {
        if config.index.is_empty() {
            return Err(Error::Config("index name not specified".to_string()));
        }
        let index = config.index.to_lowercase();

        let servers = if config.servers.is_empty() {
            std::env::var(SERVER_ENV)
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default()
        } else {
            config.servers.clone()
        };

        let signer = if config.serverless || config.aws_auth {
            let service = if config.serverless {
                SERVERLESS_SERVICE
            } else {
                MANAGED_SERVICE
            };
            Some(AwsSigner::from_env(service).await?)
        } else {
            None
        };

        let transport = HttpTransport::new(
            parse_servers(&servers, "OpenSearch")?,
            config.insecure_skip_verify,
            signer,
        )?;
        Self::check(&transport, config.serverless).await?;

        transport.ensure_index(&index, "OpenSearch").await?;
        Ok(Self { transport, index })
    }

    async fn check(transport: &HttpTransport, serverless: bool) -> Result<()> {
        if serverless {
            let status = transport
                .status(Method::HEAD, "")
                .await
                .map_err(|e| Error::Backend(format!("failed to ping opensearch serverless: {e}")))?;
            if !status.is_success() {
                return Err(Error::Backend(format!(
                    "failed to ping opensearch serverless: status {}",
                    status.as_u16()
                )));
            }
            return Ok(());
        }

        let status = transport.status(Method::GET, "_cluster/health").await?;
        if status != StatusCode::OK {
            return Err(Error::Backend(format!(
                "unexpected OpenSearch status code: {}",
                status.as_u16()
            )));
        }
        Ok(())
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
