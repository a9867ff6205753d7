//! File-backed consolidated results.
//!
//! Jobs whose consolidated result payload exceeds the inline threshold keep
//! the payload in `<results_dir>/<job_id>.json` and only a [`ResultFileRef`]
//! on the record. Writes go through a temp file plus rename, so a concurrent
//! reader never observes a partial payload.
//!
//! Result files age out on their own TTL, independent of the job record TTL.
//! [`ResultFileManager::sweep_expired`] removes files whose modification age
//! exceeds it; the orchestrator owns the periodic sweeper task via
//! [`ResultFileManager::spawn_sweeper`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reportd_domain::{BatchItemResult, ResultFileRef};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

const TMP_SUFFIX: &str = ".tmp";

/// Manages file-backed result payloads under a single results directory.
#[derive(Debug)]
pub struct ResultFileManager {
    dir: PathBuf,
    results_ttl: Duration,
}

impl ResultFileManager {
    /// Creates a manager rooted at `dir`, creating the directory if needed.
    pub async fn new(dir: impl Into<PathBuf>, results_ttl: Duration) -> StorageResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(StorageError::io)?;
        Ok(Self { dir, results_ttl })
    }

    /// Serializes the item results to `<dir>/<job_id>.json` and returns the
    /// reference to store on the job record.
    ///
    /// The payload is written to a temp file and renamed into place.
    pub async fn put(
        &self,
        job_id: &str,
        results: &[BatchItemResult],
    ) -> StorageResult<ResultFileRef> {
        let payload = serde_json::to_vec(results).map_err(StorageError::serialization)?;
        let file = format!("{job_id}.json");
        let final_path = self.dir.join(&file);
        let tmp_path = self.dir.join(format!("{file}{TMP_SUFFIX}"));

        tokio::fs::write(&tmp_path, &payload)
            .await
            .map_err(StorageError::io)?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(StorageError::io)?;

        debug!(job_id, bytes = payload.len(), "offloaded job results to file");
        Ok(ResultFileRef {
            file,
            item_count: results.len(),
            byte_size: payload.len() as u64,
        })
    }

    /// Reads back a file-backed payload.
    ///
    /// A reference whose file has already been swept yields
    /// [`StorageError::JobNotFound`]; the job record outliving its result
    /// file is an accepted race.
    pub async fn get(&self, file_ref: &ResultFileRef) -> StorageResult<Vec<BatchItemResult>> {
        let path = self.dir.join(&file_ref.file);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::JobNotFound {
                    job_id: job_id_from_file(&file_ref.file),
                })
            }
            Err(err) => return Err(StorageError::io(err)),
        };
        serde_json::from_slice(&raw).map_err(StorageError::serialization)
    }

    /// Deletes result files (temp files included) whose modification age
    /// exceeds the results TTL. Returns the number of files removed.
    pub async fn sweep_expired(&self) -> StorageResult<usize> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(StorageError::io)?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(StorageError::io)? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(".json") && !name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable result file");
                    continue;
                }
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| mtime.elapsed().ok());
            if age.is_some_and(|age| age > self.results_ttl) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!(path = %path.display(), "swept expired result file");
                        removed += 1;
                    }
                    // Already gone is fine; a competing sweep won.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to sweep result file");
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Runs `sweep_expired` every `interval` until the token is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("result file sweeper stopping");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
                match manager.sweep_expired().await {
                    Ok(removed) if removed > 0 => {
                        debug!(removed, "result file sweep completed");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "result file sweep failed");
                    }
                }
            }
        })
    }
}

fn job_id_from_file(file: &str) -> String {
    file.strip_suffix(".json").unwrap_or(file).to_string()
}
