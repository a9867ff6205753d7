//! Batch orchestrator implementation.

use std::sync::Arc;

use dashmap::DashMap;
use reportd_domain::allowlist::AllowlistValidator;
use reportd_domain::{BatchItemResult, BatchJob, ItemOutcome, JobStatus};
use reportd_storage::{JobStore, ResultFileManager, StorageError};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::types::{resolve_endpoint, BatchError, JobView, SubmitRequest};
use crate::config::BatchSettings;
use crate::upstream::ReportFetcher;

/// Orchestrates batch report jobs: validated submission, a fixed worker
/// pool, per-item failure isolation, cooperative cancellation, and result
/// consolidation.
///
/// The job store is the single source of truth: workers re-read the record
/// after dequeue instead of trusting the queued id, which is what makes
/// cancel-while-queued and TTL expiry safe.
pub struct BatchOrchestrator {
    store: Arc<dyn JobStore>,
    fetcher: Arc<dyn ReportFetcher>,
    files: Arc<ResultFileManager>,
    validator: AllowlistValidator,
    settings: BatchSettings,
    queue_tx: mpsc::Sender<String>,
    /// Cancellation tokens for jobs currently held by a worker.
    cancel_tokens: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl BatchOrchestrator {
    /// Creates the orchestrator and spawns its worker pool and the result
    /// file sweeper.
    pub async fn start(
        settings: BatchSettings,
        validator: AllowlistValidator,
        store: Arc<dyn JobStore>,
        fetcher: Arc<dyn ReportFetcher>,
        files: Arc<ResultFileManager>,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_size);
        let shutdown = CancellationToken::new();

        let orchestrator = Arc::new(Self {
            store,
            fetcher,
            files,
            validator,
            settings,
            queue_tx,
            cancel_tokens: DashMap::new(),
            shutdown,
            handles: Mutex::new(Vec::new()),
        });

        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let mut handles = Vec::with_capacity(orchestrator.settings.workers + 1);
        for worker_id in 0..orchestrator.settings.workers {
            let this = Arc::clone(&orchestrator);
            let queue_rx = Arc::clone(&queue_rx);
            handles.push(tokio::spawn(async move {
                this.worker_loop(worker_id, queue_rx).await;
            }));
        }
        handles.push(orchestrator.files.spawn_sweeper(
            orchestrator.settings.sweep_interval(),
            orchestrator.shutdown.child_token(),
        ));
        orchestrator.handles.lock().await.extend(handles);

        orchestrator
    }

    /// Validates and accepts a batch submission.
    ///
    /// Every rejection happens synchronously, before any job record exists.
    /// On acceptance the job is stored as Queued, enqueued for a worker, and
    /// its id returned immediately.
    pub async fn submit(&self, request: SubmitRequest) -> Result<String, BatchError> {
        if request.params.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        if request.params.len() > self.settings.max_items {
            return Err(BatchError::TooManyItems {
                count: request.params.len(),
                max: self.settings.max_items,
            });
        }
        if let Some(max) = self.settings.max_records {
            let declared = request.declared_record_total();
            if declared > max {
                return Err(BatchError::RecordLimitExceeded { declared, max });
            }
        }
        let endpoint = resolve_endpoint(&self.validator, request.endpoint.as_deref())?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let method = request.method().to_string();
        let job = BatchJob::new(
            job_id.clone(),
            endpoint.as_str(),
            method,
            request.source_id,
            request.params,
            request.metadata,
        );
        self.store.put(&job).await?;

        if let Err(err) = self.queue_tx.try_send(job_id.clone()) {
            // Roll the record back so a rejected submission leaves no trace.
            if let Err(delete_err) = self.store.delete(&job_id).await {
                warn!(job_id, error = %delete_err, "failed to roll back rejected submission");
            }
            return match err {
                mpsc::error::TrySendError::Full(_) => Err(BatchError::QueueFull),
                mpsc::error::TrySendError::Closed(_) => Err(BatchError::Internal {
                    message: "job queue is closed".to_string(),
                }),
            };
        }

        metrics::counter!("reportd_jobs_submitted_total").increment(1);
        info!(
            job_id,
            items = job.total_items(),
            endpoint = %endpoint,
            "batch job accepted"
        );
        Ok(job_id)
    }

    /// Requests cancellation of a job. Idempotent.
    ///
    /// Queued jobs become Cancelled with no item ever dispatched. Running
    /// jobs have their token cancelled; the worker observes it between item
    /// dispatches, so in-flight calls finish. Terminal jobs are untouched.
    ///
    /// Returns the job status as of this call.
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus, BatchError> {
        let mut job = self.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job.status);
        }

        // The token fires immediately, without waiting on a store round
        // trip, for any worker already past its record read.
        if let Some(token) = self.cancel_tokens.get(job_id) {
            token.cancel();
        }
        if job.status == JobStatus::Queued {
            // The written record stops workers that dequeue after this.
            job.mark_cancelled();
            self.store.put(&job).await?;
            // A worker may have registered its token and read the record
            // between the first lookup and the write landing.
            if let Some(token) = self.cancel_tokens.get(job_id) {
                token.cancel();
            }
            info!(job_id, "queued job cancelled");
        } else {
            info!(job_id, "cancellation requested for running job");
        }
        Ok(job.status)
    }

    /// Returns the current view of a job: status and progress while running,
    /// inline results or the file-reference summary when terminal.
    pub async fn status(&self, job_id: &str) -> Result<JobView, BatchError> {
        let job = self.get_job(job_id).await?;
        Ok(JobView::from_job(&job))
    }

    /// Returns the full item results, resolving a file-backed payload.
    pub async fn results(&self, job_id: &str) -> Result<Vec<BatchItemResult>, BatchError> {
        let job = self.get_job(job_id).await?;
        match &job.result_file {
            Some(file_ref) => Ok(self.files.get(file_ref).await.map_err(|err| match err {
                StorageError::JobNotFound { job_id } => BatchError::JobNotFound { job_id },
                other => BatchError::Storage(other),
            })?),
            None => Ok(job.results),
        }
    }

    /// Stops the worker pool and the file sweeper, then awaits their
    /// handles. Jobs mid-run observe the shutdown as a cancellation.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "orchestrator task ended abnormally");
            }
        }
    }

    async fn get_job(&self, job_id: &str) -> Result<BatchJob, BatchError> {
        self.store.get(job_id).await.map_err(|err| match err {
            StorageError::JobNotFound { job_id } => BatchError::JobNotFound { job_id },
            other => BatchError::Storage(other),
        })
    }

    async fn worker_loop(&self, worker_id: usize, queue_rx: Arc<Mutex<mpsc::Receiver<String>>>) {
        debug!(worker_id, "batch worker started");
        loop {
            let job_id = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job_id = async { queue_rx.lock().await.recv().await } => match job_id {
                    Some(job_id) => job_id,
                    None => break,
                },
            };
            self.run_job(&job_id).await;
        }
        debug!(worker_id, "batch worker stopped");
    }

    /// Executes one dequeued job end to end.
    async fn run_job(&self, job_id: &str) {
        // The token is registered before the record is read. Combined with
        // cancel() re-checking the token registry after its record write,
        // every cancel lands either on this read or on the token; there is
        // no window where a cancelled job still dispatches.
        let token = self.shutdown.child_token();
        self.cancel_tokens.insert(job_id.to_string(), token.clone());

        let mut job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(StorageError::JobNotFound { .. }) => {
                // Expired between submission and dequeue.
                debug!(job_id, "dequeued job no longer present, skipping");
                self.cancel_tokens.remove(job_id);
                return;
            }
            Err(err) => {
                warn!(job_id, error = %err, "failed to load dequeued job");
                self.cancel_tokens.remove(job_id);
                return;
            }
        };
        if job.status != JobStatus::Queued {
            // Covers cancel-while-queued.
            debug!(job_id, status = job.status.as_str(), "dequeued job not queued, skipping");
            self.cancel_tokens.remove(job_id);
            return;
        }

        let outcome = self.execute(&mut job, &token).await;
        self.cancel_tokens.remove(job_id);

        if let Err(err) = outcome {
            error!(job_id, error = %err, "batch job failed");
            job.mark_failed(err.to_string());
            metrics::counter!("reportd_jobs_completed_total", "status" => "failed").increment(1);
            if let Err(put_err) = self.store.put(&job).await {
                error!(job_id, error = %put_err, "failed to record job failure");
            }
        }
    }

    /// Records one joined item outcome and re-stores the record, so status
    /// queries see progress as items finish.
    async fn record_joined(
        &self,
        job: &mut BatchJob,
        slots: &mut [Option<BatchItemResult>],
        joined: Result<(usize, ItemOutcome), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((index, outcome)) => {
                slots[index] = Some(BatchItemResult::new(index, outcome));
                job.results = slots.iter().flatten().cloned().collect();
                if let Err(err) = self.store.put(job).await {
                    warn!(job_id = %job.id, error = %err, "failed to record item progress");
                }
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "batch item task failed to join");
            }
        }
    }

    async fn execute(
        &self,
        job: &mut BatchJob,
        token: &CancellationToken,
    ) -> Result<(), BatchError> {
        job.mark_running();
        self.store.put(job).await?;

        let endpoint = Url::parse(&job.endpoint).map_err(|err| BatchError::Internal {
            message: format!("stored endpoint is not a valid URL: {err}"),
        })?;

        let total = job.total_items();
        let mut slots: Vec<Option<BatchItemResult>> = vec![None; total];
        let mut join_set: JoinSet<(usize, ItemOutcome)> = JoinSet::new();
        let semaphore = Arc::new(Semaphore::new(self.settings.item_concurrency));
        let mut cancelled = false;

        let mut dispatched = 0;
        while dispatched < total {
            // Cancellation is observed between dispatches only; calls
            // already in flight run to completion. The select is biased so
            // an already-cancelled token always wins over the next dispatch.
            // Finished items are recorded as they land, even while later
            // dispatches wait on the concurrency limit.
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    cancelled = true;
                    for (undispatched, slot) in slots.iter_mut().enumerate().skip(dispatched) {
                        *slot = Some(BatchItemResult::new(undispatched, ItemOutcome::Cancelled));
                    }
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    let fetcher = Arc::clone(&self.fetcher);
                    let url = endpoint.clone();
                    let method = job.method.clone();
                    let params = job.params[dispatched].clone();
                    let index = dispatched;
                    join_set.spawn(async move {
                        let _permit = permit;
                        let outcome = match fetcher.fetch(&url, &method, &params).await {
                            Ok(data) => ItemOutcome::Success { data },
                            Err(err) => ItemOutcome::Error {
                                error: err.kind(),
                                message: err.to_string(),
                            },
                        };
                        (index, outcome)
                    });
                    metrics::counter!("reportd_items_dispatched_total").increment(1);
                    dispatched += 1;
                }
                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    self.record_joined(job, &mut slots, joined).await;
                }
            }
        }

        while let Some(joined) = join_set.join_next().await {
            self.record_joined(job, &mut slots, joined).await;
        }

        cancelled = cancelled || token.is_cancelled();

        let results: Vec<BatchItemResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    BatchItemResult::new(
                        index,
                        ItemOutcome::Error {
                            error: reportd_domain::UpstreamErrorKind::Connection,
                            message: "item task aborted".to_string(),
                        },
                    )
                })
            })
            .collect();

        let payload = serde_json::to_vec(&results).map_err(|err| BatchError::Internal {
            message: format!("failed to serialize job results: {err}"),
        })?;

        if payload.len() as u64 > self.settings.max_result_bytes {
            let file_ref = self.files.put(&job.id, &results).await?;
            job.results.clear();
            job.result_file = Some(file_ref);
        } else {
            job.results = results;
            job.result_file = None;
        }

        if cancelled {
            job.mark_cancelled();
        } else {
            job.mark_completed();
        }
        self.store.put(job).await?;

        metrics::counter!("reportd_jobs_completed_total", "status" => job.status.as_str())
            .increment(1);
        info!(
            job_id = %job.id,
            status = job.status.as_str(),
            items = total,
            offloaded = job.result_file.is_some(),
            "batch job finished"
        );
        Ok(())
    }
}
