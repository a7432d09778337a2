use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use k8s_openapi::serde_json;
use serde::Serialize;

use super::IndexingOpts;
use crate::error::{Error, Result};

/// Writes each batch as a JSON array to `{dir}/{metric}[-{job}].json`.
#[derive(Debug, Clone)]
pub struct LocalIndexer {
    metrics_directory: PathBuf,
}

impl LocalIndexer {
    pub fn new(metrics_directory: impl AsRef<Path>) -> Result<Self> {
        let dir = metrics_directory.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(Error::Config("directory name not specified".to_string()));
        }
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        Ok(Self {
            metrics_directory: dir.to_path_buf(),
        })
    }

    pub fn metrics_directory(&self) -> &Path {
        &self.metrics_directory
    }

    pub fn file_path(&self, opts: &IndexingOpts) -> PathBuf {
        let name = if opts.job_name.is_empty() {
            format!("{}.json", opts.metric_name)
        } else {
            format!("{}-{}.json", opts.metric_name, opts.job_name)
        };
        self.metrics_directory.join(name)
    }

    #[tracing::instrument(skip(self, documents), fields(count = documents.len()))]
    pub fn index<T: Serialize>(&self, documents: &[T], opts: &IndexingOpts) -> Result<String> {
        if documents.is_empty() {
            return Err(Error::Config(format!(
                "Empty document list in {}",
                opts.metric_name
            )));
        }
        if opts.metric_name.is_empty() {
            return Err(Error::Config("MetricName shouldn't be empty".to_string()));
        }

        let mut body = serde_json::to_vec(documents)
            .map_err(|e| Error::Backend(format!("JSON encoding error: {e}")))?;
        body.push(b'\n');

        // staged next to the target so the rename stays on one filesystem
        let path = self.file_path(opts);
        let creating = |e: std::io::Error| Error::Io {
            context: format!("Error creating metrics file {}", path.display()),
            source: e,
        };
        let mut staged = tempfile::NamedTempFile::new_in(&self.metrics_directory).map_err(creating)?;
        staged
            .write_all(&body)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| Error::io(staged.path(), e))?;
        staged.persist(&path).map_err(|e| creating(e.error))?;

        Ok(format!(
            "File {} created with {} documents",
            path.display(),
            documents.len()
        ))
    }
}
