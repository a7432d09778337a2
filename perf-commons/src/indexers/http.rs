use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, Method, StatusCode, Url};

use super::aws::AwsSigner;
use super::bulk::{BulkBackend, BulkResponse};
use crate::error::{Error, Result};

pub const DEFAULT_SERVER: &str = "http://localhost:9200";

/// HTTP client for an Elasticsearch or OpenSearch cluster. Requests rotate
/// across the configured servers.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    servers: Arc<[Url]>,
    next: Arc<AtomicUsize>,
    signer: Option<Arc<AwsSigner>>,
}

/// Parses server addresses; `label` prefixes the error.
pub fn parse_servers(servers: &[String], label: &str) -> Result<Vec<Url>> {
    let servers: Vec<&str> = if servers.is_empty() {
        vec![DEFAULT_SERVER]
    } else {
        servers.iter().map(String::as_str).collect()
    };
    servers
        .into_iter()
        .map(|s| {
            let mut url = Url::parse(s.trim()).map_err(|e| {
                Error::Config(format!("error creating the {label} client: {s}: {e}"))
            })?;
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            Ok(url)
        })
        .collect()
}

impl HttpTransport {
    pub fn new(servers: Vec<Url>, insecure_skip_verify: bool, signer: Option<AwsSigner>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()?;
        Ok(Self {
            client,
            servers: servers.into(),
            next: Arc::new(AtomicUsize::new(0)),
            signer: signer.map(Arc::new),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        self.servers[i]
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("invalid path {path}: {e}")))
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<(Bytes, &'static str)>,
    ) -> Result<reqwest::Response> {
        let mut builder = self.client.request(method, self.url(path)?);
        if let Some((body, content_type)) = body {
            builder = builder.header(CONTENT_TYPE, content_type).body(body);
        }
        let mut request = builder.build()?;
        if let Some(signer) = &self.signer {
            signer.sign(&mut request)?;
        }
        Ok(self.client.execute(request).await?)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: Vec<u8>) -> Result<reqwest::Response> {
        self.send(Method::POST, path, Some((body.into(), "application/json")))
            .await
    }

    /// Creates `index` unless it already exists.
    pub async fn ensure_index(&self, index: &str, label: &str) -> Result<()> {
        let exists = self.send(Method::HEAD, index, None).await?;
        if exists.status().is_success() {
            return Ok(());
        }
        let created = self.send(Method::PUT, index, None).await?;
        if !created.status().is_success() {
            let status = created.status();
            let body = created.text().await.unwrap_or_default();
            return Err(Error::Backend(format!(
                "error creating index {index} on {label}: [{status}] {body}"
            )));
        }
        tracing::info!(index, "created index");
        Ok(())
    }

    /// Status of a bodiless request.
    pub async fn status(&self, method: Method, path: &str) -> Result<StatusCode> {
        Ok(self.send(method, path, None).await?.status())
    }
}

#[async_trait]
impl BulkBackend for HttpTransport {
    async fn bulk(&self, body: Bytes) -> Result<BulkResponse> {
        let response = self
            .send(Method::POST, "_bulk", Some((body, "application/x-ndjson")))
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("bulk request failed: [{status}] {text}")));
        }
        Ok(response.json().await?)
    }
}
