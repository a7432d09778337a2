//! Concurrent `_bulk` indexing.
//!
//! Documents go through a bounded queue to a fixed pool of workers. Each
//! worker buffers NDJSON until `flush_bytes` is reached, then hands the buffer
//! to a [`BulkBackend`]. Per-item outcomes are tallied in one shared map.

use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures::future::join_all;
use k8s_openapi::serde_json::{self, json};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex},
    task::{AbortHandle, JoinHandle},
};

use crate::error::{Error, Result};

pub const DEFAULT_FLUSH_BYTES: usize = 5_000_000;
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const FAILED: &str = "failed";

/// Receives one NDJSON `_bulk` body per flush.
#[async_trait]
pub trait BulkBackend: Send + Sync + 'static {
    async fn bulk(&self, body: Bytes) -> Result<BulkResponse>;
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BTreeMap<String, BulkResponseItem>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkResponseItem {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub status: u16,
    pub result: Option<String>,
    pub error: Option<BulkItemError>,
}

#[derive(Debug, Deserialize)]
pub struct BulkItemError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct BulkIndexerConfig {
    pub index: String,
    pub flush_bytes: usize,
    pub num_workers: usize,
    pub timeout: Duration,
}

impl BulkIndexerConfig {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            flush_bytes: DEFAULT_FLUSH_BYTES,
            num_workers: num_cpus::get().max(1),
            timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// One `index` operation.
#[derive(Debug, Clone)]
pub struct BulkItem {
    pub id: String,
    pub body: Vec<u8>,
}

impl BulkItem {
    /// Serializes `doc` and derives its id from the SHA-256 of the JSON.
    pub fn from_document<T: Serialize + ?Sized>(doc: &T, position: usize) -> Result<Self> {
        let body = serde_json::to_vec(doc).map_err(|e| {
            Error::Backend(format!("Cannot encode document {position}: {e}"))
        })?;
        Ok(Self {
            id: document_id(&body),
            body,
        })
    }
}

pub fn document_id(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Outcome counts of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingStats {
    pub outcomes: BTreeMap<String, u64>,
    pub elapsed: Duration,
}

impl fmt::Display for IndexingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = Duration::from_millis(self.elapsed.as_millis() as u64);
        write!(f, "Indexing finished in {elapsed:?}:")?;
        for (outcome, count) in &self.outcomes {
            write!(f, " {outcome}={count}")?;
        }
        Ok(())
    }
}

struct Shared {
    stats: Mutex<BTreeMap<String, u64>>,
    first_error: Mutex<Option<Error>>,
}

impl Shared {
    fn record(&self, response: BulkResponse) {
        let mut stats = self.stats.lock();
        for item in response.items {
            for (_action, outcome) in item {
                match outcome.error {
                    Some(err) => {
                        tracing::warn!(
                            id = %outcome.id,
                            status = outcome.status,
                            kind = %err.kind,
                            reason = %err.reason,
                            "document rejected"
                        );
                        *stats.entry(FAILED.to_string()).or_insert(0) += 1;
                    }
                    None => {
                        let result = outcome.result.unwrap_or_else(|| "unknown".to_string());
                        *stats.entry(result).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    fn fail(&self, err: Error) {
        tracing::error!(error = %err, "bulk flush failed");
        let mut first = self.first_error.lock();
        if first.is_none() {
            *first = Some(err);
        }
    }
}

pub struct BulkIndexer {
    sender: mpsc::Sender<BulkItem>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    timeout: Duration,
    started: Instant,
}

impl BulkIndexer {
    /// Spawns the workers. Must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn BulkBackend>, config: BulkIndexerConfig) -> Self {
        let num_workers = config.num_workers.max(1);
        let (sender, receiver) = mpsc::channel::<BulkItem>(num_workers * 64);
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let shared = Arc::new(Shared {
            stats: Mutex::new(BTreeMap::new()),
            first_error: Mutex::new(None),
        });
        let index: Arc<str> = config.index.into();

        let workers = (0..num_workers)
            .map(|_| {
                let worker = Worker {
                    backend: backend.clone(),
                    receiver: receiver.clone(),
                    shared: shared.clone(),
                    index: index.clone(),
                    flush_bytes: config.flush_bytes,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self {
            sender,
            workers,
            shared,
            timeout: config.timeout,
            started: Instant::now(),
        }
    }

    pub async fn add(&self, item: BulkItem) -> Result<()> {
        self.sender
            .send(item)
            .await
            .map_err(|_| Error::Backend("bulk indexer workers are gone".to_string()))
    }

    /// Waits for the queue to drain and every worker to flush, bounded by the
    /// configured timeout. Returns the first flush error, if any.
    pub async fn close(self) -> Result<IndexingStats> {
        let BulkIndexer {
            sender,
            workers,
            shared,
            timeout,
            started,
        } = self;
        drop(sender);

        let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();
        let joined = match tokio::time::timeout(timeout, join_all(workers)).await {
            Ok(joined) => joined,
            Err(_) => {
                // no flush may outlive a timed out close
                aborts.iter().for_each(AbortHandle::abort);
                tracing::error!("bulk indexer did not finish within {timeout:?}");
                return Err(Error::Timeout(timeout));
            }
        };
        for result in joined {
            result.map_err(|e| Error::Backend(format!("bulk worker panicked: {e}")))?;
        }

        if let Some(err) = shared.first_error.lock().take() {
            return Err(Error::Backend(format!("Unexpected bulk indexing error: {err}")));
        }

        let outcomes = shared.stats.lock().clone();
        Ok(IndexingStats {
            outcomes,
            elapsed: started.elapsed(),
        })
    }
}

struct Worker {
    backend: Arc<dyn BulkBackend>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<BulkItem>>>,
    shared: Arc<Shared>,
    index: Arc<str>,
    flush_bytes: usize,
}

impl Worker {
    async fn run(self) {
        let mut buffer = BytesMut::new();
        loop {
            let next = self.receiver.lock().await.recv().await;
            let Some(item) = next else {
                break;
            };
            self.append(&mut buffer, &item);
            if buffer.len() >= self.flush_bytes {
                self.flush(&mut buffer).await;
            }
        }
        self.flush(&mut buffer).await;
    }

    fn append(&self, buffer: &mut BytesMut, item: &BulkItem) {
        let action = json!({"index": {"_index": &*self.index, "_id": item.id}});
        buffer.put_slice(action.to_string().as_bytes());
        buffer.put_u8(b'\n');
        buffer.put_slice(&item.body);
        buffer.put_u8(b'\n');
    }

    async fn flush(&self, buffer: &mut BytesMut) {
        if buffer.is_empty() {
            return;
        }
        let body = buffer.split().freeze();
        match self.backend.bulk(body).await {
            Ok(response) => self.shared.record(response),
            Err(err) => self.shared.fail(err),
        }
    }
}

/// Indexes `documents` into `index` through `backend`.
///
/// Every document is encoded before anything is sent, so one bad document
/// fails the call without a partial submission.
pub async fn index_documents<T: Serialize>(
    backend: Arc<dyn BulkBackend>,
    config: BulkIndexerConfig,
    documents: &[T],
) -> Result<IndexingStats> {
    let items = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| BulkItem::from_document(doc, i))
        .collect::<Result<Vec<_>>>()?;

    let indexer = BulkIndexer::new(backend, config);
    for item in items {
        indexer.add(item).await?;
    }
    indexer.close().await
}
