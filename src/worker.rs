use crate::args::{build_args, JobSpec};
use crate::config::DownloaderConfig;
use crate::events::{EventSender, Reporter};
use crate::journal::BatchJournal;
use crate::paths::AppPaths;
use crate::runner::{CancelToken, ProcessRunner, ProcessSlot, RunOutcome};
use crate::Result;
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

pub const JOB_SUCCEEDED_MARKER: &str = "✅ Finished:";
pub const JOB_FAILED_MARKER: &str = "❌ Failed:";
pub const JOB_CANCELED_MARKER: &str = "⏹ Canceled:";
pub const BATCH_CANCELED_MARKER: &str = "=== CANCELLED ===";
pub const BATCH_COMPLETED_MARKER: &str = "=== ALL DONE ===";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Created,
    Running,
    Completed,
    Cancelled,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub state: BatchState,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs whose process was stopped by a cancellation.
    pub canceled: usize,
    /// Jobs that never started.
    pub skipped: usize,
}

impl BatchSummary {
    fn new(total: usize) -> Self {
        Self {
            state: BatchState::Created,
            total,
            succeeded: 0,
            failed: 0,
            canceled: 0,
            skipped: 0,
        }
    }
}

#[derive(Debug)]
struct Status {
    summary: BatchSummary,
    finished: bool,
}

#[derive(Debug)]
struct Shared {
    status: Mutex<Status>,
    finished: Condvar,
}

impl Shared {
    fn new(total: usize) -> Self {
        Self {
            status: Mutex::new(Status {
                summary: BatchSummary::new(total),
                finished: false,
            }),
            finished: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Terminal states are sticky.
    fn transition(&self, to: BatchState) -> bool {
        let mut status = self.lock();
        if status.summary.state.is_terminal() {
            return false;
        }
        status.summary.state = to;
        true
    }

    fn update(&self, f: impl FnOnce(&mut BatchSummary)) {
        f(&mut self.lock().summary);
    }

    fn finish(&self) {
        let mut status = self.lock();
        if !status.summary.state.is_terminal() {
            status.summary.state = BatchState::Cancelled;
        }
        status.finished = true;
        self.finished.notify_all();
    }
}

/// Marks the batch finished even if the worker thread unwinds.
struct FinishOnDrop(Arc<Shared>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Control surface for a running batch. Cloning is cheap; all clones observe
/// the same batch.
#[derive(Debug, Clone)]
pub struct BatchHandle {
    batch_id: String,
    tag: String,
    cancel: CancelToken,
    slot: ProcessSlot,
    shared: Arc<Shared>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Requests cancellation from any thread.
    ///
    /// The first call sets the flag and asks the running process (if any) to
    /// exit; returns `true`. Later calls return `false` and only kill a process
    /// that is still present.
    pub fn cancel(&self) -> bool {
        if self.cancel.cancel() {
            self.slot.terminate();
            true
        } else {
            self.slot.kill();
            false
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_canceled()
    }

    pub fn state(&self) -> BatchState {
        self.shared.lock().summary.state
    }

    pub fn summary(&self) -> BatchSummary {
        self.shared.lock().summary.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.lock().finished
    }

    pub fn wait(&self) -> BatchSummary {
        let mut status = self.shared.lock();
        while !status.finished {
            status = self
                .shared
                .finished
                .wait(status)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        status.summary.clone()
    }

    /// `None` if the batch is still running after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<BatchSummary> {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.lock();
        while !status.finished {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            status = self
                .shared
                .finished
                .wait_timeout(status, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        Some(status.summary.clone())
    }
}

/// Runs one batch of jobs sequentially on its own thread.
pub struct BatchWorker {
    batch_id: String,
    tag: String,
    jobs: Vec<JobSpec>,
    runner: ProcessRunner,
    config: DownloaderConfig,
    events: EventSender,
    journal: Option<BatchJournal>,
    predecessor: Option<BatchHandle>,
}

impl BatchWorker {
    pub fn new(
        tag: impl Into<String>,
        jobs: Vec<JobSpec>,
        runner: ProcessRunner,
        config: DownloaderConfig,
        events: EventSender,
    ) -> Self {
        Self {
            batch_id: uuid::Uuid::new_v4().to_string(),
            tag: tag.into(),
            jobs,
            runner,
            config,
            events,
            journal: None,
            predecessor: None,
        }
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Mirror this batch into `<base>/logs/batches/<batch_id>.jsonl`.
    pub fn with_journal(mut self, paths: &AppPaths) -> Self {
        self.journal = Some(BatchJournal::open(paths, &self.batch_id, &self.tag));
        self
    }

    /// Do not start the first job before `predecessor` has finished.
    pub fn after(mut self, predecessor: BatchHandle) -> Self {
        self.predecessor = Some(predecessor);
        self
    }

    pub fn start(self) -> Result<BatchHandle> {
        let shared = Arc::new(Shared::new(self.jobs.len()));
        let handle = BatchHandle {
            batch_id: self.batch_id.clone(),
            tag: self.tag.clone(),
            cancel: CancelToken::new(),
            slot: ProcessSlot::new(),
            shared: shared.clone(),
        };

        let thread_handle = handle.clone();
        thread::Builder::new()
            .name(format!("batch-{}", self.tag))
            .spawn(move || {
                let _finish = FinishOnDrop(shared);
                self.run(&thread_handle);
            })?;

        Ok(handle)
    }

    fn run(self, handle: &BatchHandle) {
        let BatchWorker {
            batch_id,
            tag,
            jobs,
            runner,
            config,
            events,
            journal,
            predecessor,
        } = self;
        let shared = &handle.shared;
        let cancel = &handle.cancel;

        if let Some(previous) = predecessor {
            previous.wait();
        }

        let reporter = Reporter::new(tag, events, journal);
        shared.transition(BatchState::Running);
        reporter.record(
            "info",
            "batch_started",
            serde_json::json!({
                "batch_id": batch_id,
                "jobs": jobs.len(),
                "tool": runner.program().to_string_lossy(),
            }),
        );

        let total = jobs.len();
        for (index, job) in jobs.iter().enumerate() {
            if cancel.is_canceled() {
                shared.update(|s| s.skipped = total - index);
                break;
            }

            if let Err(e) = std::fs::create_dir_all(&job.output_dir) {
                reporter.log(
                    "exception",
                    "error",
                    format!(
                        "[EXCEPTION] cannot create {}: {e}",
                        job.output_dir.to_string_lossy()
                    ),
                );
                shared.update(|s| s.failed += 1);
                reporter.log("job_failed", "error", format!("{JOB_FAILED_MARKER} {}", job.url));
                continue;
            }

            let args = build_args(job, &config);
            match runner.run(&args, cancel, &handle.slot, &reporter) {
                RunOutcome::Succeeded => {
                    shared.update(|s| s.succeeded += 1);
                    reporter.log(
                        "job_succeeded",
                        "info",
                        format!("{JOB_SUCCEEDED_MARKER} {}", job.url),
                    );
                }
                RunOutcome::Canceled => {
                    shared.update(|s| s.canceled += 1);
                    reporter.log(
                        "job_canceled",
                        "warn",
                        format!("{JOB_CANCELED_MARKER} {}", job.url),
                    );
                }
                RunOutcome::Failed => {
                    shared.update(|s| s.failed += 1);
                    reporter.log("job_failed", "error", format!("{JOB_FAILED_MARKER} {}", job.url));
                }
            }
        }

        let summary = handle.summary();
        if summary.skipped > 0 || summary.canceled > 0 {
            shared.transition(BatchState::Cancelled);
            reporter.log("batch_canceled", "warn", BATCH_CANCELED_MARKER);
        } else {
            shared.transition(BatchState::Completed);
            reporter.log("batch_completed", "info", BATCH_COMPLETED_MARKER);
        }
        if let Ok(value) = serde_json::to_value(handle.summary()) {
            reporter.record("info", "batch_summary", value);
        }
    }
}
