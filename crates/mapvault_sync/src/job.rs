//! Background jobs with observable status.

use crate::error::{SyncError, SyncResult};
use mapvault_core::EventFeed;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Lifecycle of a job: `Queued → Running → (Succeeded | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Created, not started.
    Queued,
    /// Running on the runtime.
    Running,
    /// Finished with a result.
    Succeeded,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Generates and materializes a dataset.
    Provision,
    /// Exchanges changes with the remote service.
    Sync,
}

/// Unique identifier of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A status change of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    /// Job the event belongs to.
    pub job_id: JobId,
    /// Kind of job.
    pub kind: JobKind,
    /// New status.
    pub status: JobStatus,
    /// Error message, set on `Failed`.
    pub error: Option<String>,
}

type JobFuture<T> = Pin<Box<dyn Future<Output = SyncResult<T>> + Send + 'static>>;

enum JobState<T> {
    Queued(JobFuture<T>),
    Started(JoinHandle<SyncResult<T>>),
    Finished,
}

struct Tracker {
    id: JobId,
    kind: JobKind,
    status: Mutex<JobStatus>,
    events: EventFeed<JobEvent>,
}

impl Tracker {
    fn set(&self, status: JobStatus, error: Option<String>) {
        *self.status.lock() = status;
        self.events.emit(JobEvent {
            job_id: self.id,
            kind: self.kind,
            status,
            error,
        });
    }
}

/// A unit of remote work running as its own task.
///
/// A job is created `Queued` and runs once [`Job::start`] or [`Job::result`]
/// is called; this needs a tokio runtime. Every subscriber sees the full
/// status sequence, including subscribers that arrive after the job ended.
pub struct Job<T> {
    tracker: Arc<Tracker>,
    state: Mutex<JobState<T>>,
}

impl<T: Send + 'static> Job<T> {
    pub(crate) fn new(
        kind: JobKind,
        work: impl Future<Output = SyncResult<T>> + Send + 'static,
    ) -> Self {
        let tracker = Arc::new(Tracker {
            id: JobId::new(),
            kind,
            status: Mutex::new(JobStatus::Queued),
            events: EventFeed::with_history(8),
        });
        tracker.set(JobStatus::Queued, None);
        Self {
            tracker,
            state: Mutex::new(JobState::Queued(Box::pin(work))),
        }
    }

    /// The job's id.
    pub fn id(&self) -> JobId {
        self.tracker.id
    }

    /// The job's kind.
    pub fn kind(&self) -> JobKind {
        self.tracker.kind
    }

    /// The current status.
    pub fn status(&self) -> JobStatus {
        *self.tracker.status.lock()
    }

    /// Subscribes to status changes. Past changes are replayed first.
    pub fn subscribe(&self) -> Receiver<JobEvent> {
        self.tracker.events.subscribe()
    }

    /// Spawns the job. Returns false if it was already started.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, JobState::Finished) {
            JobState::Queued(work) => {
                let tracker = Arc::clone(&self.tracker);
                let span = info_span!("job", id = %tracker.id, kind = ?tracker.kind);
                *state = JobState::Started(tokio::spawn(run(tracker, work).instrument(span)));
                true
            }
            other => {
                *state = other;
                false
            }
        }
    }

    /// Starts the job if needed and waits for its result.
    pub async fn result(self) -> SyncResult<T> {
        self.start();
        let state = std::mem::replace(&mut *self.state.lock(), JobState::Finished);
        match state {
            JobState::Started(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    if self.tracker.status.lock().is_terminal() {
                        return Err(SyncError::Aborted(e.to_string()));
                    }
                    self.tracker.set(JobStatus::Failed, Some(e.to_string()));
                    Err(SyncError::Aborted(e.to_string()))
                }
            },
            JobState::Queued(_) | JobState::Finished => {
                Err(SyncError::Aborted("job result already taken".into()))
            }
        }
    }
}

async fn run<T>(tracker: Arc<Tracker>, work: JobFuture<T>) -> SyncResult<T> {
    tracker.set(JobStatus::Running, None);
    let result = work.await;
    match &result {
        Ok(_) => {
            info!("job succeeded");
            tracker.set(JobStatus::Succeeded, None);
        }
        Err(e) => {
            warn!(error = %e, "job failed");
            tracker.set(JobStatus::Failed, Some(e.to_string()));
        }
    }
    result
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.tracker.id)
            .field("kind", &self.tracker.kind)
            .field("status", &*self.tracker.status.lock())
            .finish_non_exhaustive()
    }
}
