//! Bounded fan-out of fetch tasks for one catalog file.

use crate::fetcher::{FetchStatus, FetchTask, ImageFetcher};
use crate::image_policy::RejectReason;
use crate::uploader::{UploadStatus, Uploader};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Terminal state of one task, produced exactly once per task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Uploaded,
    SkippedDuplicate,
    SkippedFilteredOut,
    SkippedFailedValidation(RejectReason),
    Failed(String),
}

impl TaskOutcome {
    fn metric_name(&self) -> &'static str {
        match self {
            TaskOutcome::Uploaded => "curator.tasks.uploaded",
            TaskOutcome::SkippedDuplicate => "curator.tasks.duplicate",
            TaskOutcome::SkippedFilteredOut => "curator.tasks.filtered_out",
            TaskOutcome::SkippedFailedValidation(_) => "curator.tasks.rejected",
            TaskOutcome::Failed(_) => "curator.tasks.failed",
        }
    }
}

/// Per-outcome counts for a batch, a catalog file or a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Rows read from the catalog before any filtering
    pub rows_read: usize,
    /// Rows left after the threshold filters
    pub rows_accepted: usize,
    /// Accepted rows with no URI value or no derivable filename
    pub rows_dropped: usize,
    pub uploaded: usize,
    pub duplicates: usize,
    pub filtered_out: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl BatchSummary {
    /// Count an outcome and emit its metric
    pub fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Uploaded => self.uploaded += 1,
            TaskOutcome::SkippedDuplicate => self.duplicates += 1,
            TaskOutcome::SkippedFilteredOut => self.filtered_out += 1,
            TaskOutcome::SkippedFailedValidation(_) => self.rejected += 1,
            TaskOutcome::Failed(_) => self.failed += 1,
        }
        metrics::counter!(outcome.metric_name()).increment(1);
    }

    pub fn merge(&mut self, other: &BatchSummary) {
        self.rows_read += other.rows_read;
        self.rows_accepted += other.rows_accepted;
        self.rows_dropped += other.rows_dropped;
        self.uploaded += other.uploaded;
        self.duplicates += other.duplicates;
        self.filtered_out += other.filtered_out;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }

    /// Number of task outcomes recorded
    pub fn tasks(&self) -> usize {
        self.uploaded + self.duplicates + self.filtered_out + self.rejected + self.failed
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded, {} duplicate, {} filtered out, {} rejected, {} failed",
            self.uploaded, self.duplicates, self.filtered_out, self.rejected, self.failed
        )
    }
}

/// Runs fetch, validate and upload for each task on a fixed number of workers
pub struct Orchestrator {
    fetcher: Arc<ImageFetcher>,
    uploader: Arc<Uploader>,
    num_workers: usize,
    log_nonfatal_errors: bool,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<ImageFetcher>,
        uploader: Arc<Uploader>,
        num_workers: usize,
        log_nonfatal_errors: bool,
    ) -> Self {
        Self {
            fetcher,
            uploader,
            num_workers: num_workers.max(1),
            log_nonfatal_errors,
        }
    }

    /// Process every task and wait for all of them to finish.
    ///
    /// `num_workers` workers pull tasks from a shared queue and report one
    /// outcome each to a collector. A failing task never affects the others.
    #[instrument(skip(self, tasks), fields(tasks = tasks.len()))]
    pub async fn run_batch(&self, tasks: Vec<FetchTask>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        if tasks.is_empty() {
            return summary;
        }

        let (task_tx, task_rx) = mpsc::channel::<FetchTask>(tasks.len());
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<TaskOutcome>(self.num_workers);
        let task_rx = Arc::new(Mutex::new(task_rx));

        for task in tasks {
            // Capacity equals the batch size, so this never waits.
            if let Err(e) = task_tx.send(task).await {
                summary.record(&TaskOutcome::Failed(e.to_string()));
            }
        }
        drop(task_tx);

        let mut workers = JoinSet::new();
        for worker_id in 0..self.num_workers {
            let queue = task_rx.clone();
            let outcomes = outcome_tx.clone();
            let fetcher = self.fetcher.clone();
            let uploader = self.uploader.clone();
            let verbose = self.log_nonfatal_errors;

            workers.spawn(async move {
                loop {
                    let next = queue.lock().await.recv().await;
                    let Some(task) = next else { break };

                    let outcome = process_task(&fetcher, &uploader, &task, verbose).await;
                    if outcomes.send(outcome).await.is_err() {
                        break;
                    }
                }
                debug!(worker_id, "Worker drained queue");
            });
        }
        drop(outcome_tx);

        while let Some(outcome) = outcome_rx.recv().await {
            summary.record(&outcome);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker aborted");
                summary.record(&TaskOutcome::Failed(format!("worker aborted: {}", e)));
            }
        }

        info!(summary = %summary, "Batch complete");
        summary
    }
}

/// Fetch, validate and upload a single task
#[instrument(skip_all, fields(filename = %task.filename))]
async fn process_task(
    fetcher: &ImageFetcher,
    uploader: &Uploader,
    task: &FetchTask,
    verbose: bool,
) -> TaskOutcome {
    let started = Instant::now();

    let outcome = match fetcher.fetch(task).await {
        Ok(FetchStatus::Rejected(reason)) => {
            debug!(reason = %reason, "Image failed validation");
            TaskOutcome::SkippedFailedValidation(reason)
        }
        Ok(FetchStatus::Fetched { .. }) | Ok(FetchStatus::AlreadyPresent) => {
            match uploader.upload(&task.filename).await {
                Ok(UploadStatus::Uploaded) => TaskOutcome::Uploaded,
                Ok(UploadStatus::Duplicate) => TaskOutcome::SkippedDuplicate,
                Err(e) => TaskOutcome::Failed(e.to_string()),
            }
        }
        Err(e) => TaskOutcome::Failed(e.to_string()),
    };

    if let TaskOutcome::Failed(message) = &outcome {
        if verbose {
            warn!(url = %task.url, error = %message, "Task failed");
        } else {
            debug!(url = %task.url, error = %message, "Task failed");
        }
    }

    metrics::histogram!("curator.task.duration_seconds").record(started.elapsed().as_secs_f64());

    outcome
}
