//! Asynchronous job submission.
//!
//! Large operations run on their own worker thread and report back through a
//! channel. Interactive jobs are waited on with a bound; export jobs are not.
//! Once submitted a job cannot be cancelled; callers keep the handle to poll.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{PipelineError, Result};

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Diagnostics; bounded by the interactive timeout.
    Interactive,
    /// Artifact production; may run for hours.
    Export,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Interactive => f.write_str("interactive"),
            JobKind::Export => f.write_str("export"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed(String),
}

/// Completion signal of one submitted job.
pub struct JobHandle<T> {
    id: JobId,
    kind: JobKind,
    description: String,
    rx: mpsc::Receiver<Result<T>>,
    done: Option<Result<T>>,
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Non-blocking status check.
    pub fn poll(&mut self) -> JobStatus {
        if self.done.is_none() {
            match self.rx.try_recv() {
                Ok(result) => self.done = Some(result),
                Err(TryRecvError::Empty) => return JobStatus::Running,
                Err(TryRecvError::Disconnected) => return JobStatus::Failed("worker exited without a result".into()),
            }
        }
        match &self.done {
            Some(Ok(_)) => JobStatus::Completed,
            Some(Err(e)) => JobStatus::Failed(e.to_string()),
            None => JobStatus::Running,
        }
    }

    /// Block until the job finishes.
    pub fn wait(self) -> Result<T> {
        if let Some(result) = self.done {
            return result;
        }
        self.rx.recv().map_err(|_| PipelineError::JobLost(self.id))?
    }

    /// Block for at most `limit`. The job keeps running after a timeout.
    pub fn wait_timeout(self, limit: Duration) -> Result<T> {
        if let Some(result) = self.done {
            return result;
        }
        match self.rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PipelineError::InteractiveTimeout {
                id: self.id,
                description: self.description,
                secs: limit.as_secs(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::JobLost(self.id)),
        }
    }
}

/// Hands out job ids and spawns workers.
pub struct JobRunner {
    next_id: AtomicU64,
    interactive_timeout: Duration,
}

impl JobRunner {
    pub fn new(interactive_timeout: Duration) -> Self {
        Self { next_id: AtomicU64::new(1), interactive_timeout }
    }

    pub fn interactive_timeout(&self) -> Duration {
        self.interactive_timeout
    }

    pub fn submit<T, F>(&self, kind: JobKind, description: impl Into<String>, work: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let description = description.into();
        let (tx, rx) = mpsc::channel();
        debug!("[jobs] #{id} {kind}: {description}");
        thread::Builder::new().name(format!("{kind}-job-{id}")).spawn(move || {
            // The receiver may be gone after a timed-out interactive wait.
            let _ = tx.send(work());
        })?;
        Ok(JobHandle { id, kind, description, rx, done: None })
    }

    /// Submit an interactive job and wait for it within the timeout.
    pub fn interactive<T, F>(&self, description: impl Into<String>, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let handle = self.submit(JobKind::Interactive, description, work)?;
        let result = handle.wait_timeout(self.interactive_timeout);
        if let Err(e) = &result {
            if matches!(e, PipelineError::InteractiveTimeout { .. }) {
                warn!("[jobs] {e}");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn export_job_completes_and_reports_status() {
        let runner = JobRunner::new(Duration::from_secs(5));
        let (go_tx, go_rx) = channel::<()>();
        let mut handle = runner
            .submit(JobKind::Export, "classified raster", move || {
                go_rx.recv().map_err(|_| PipelineError::JobLost(0))?;
                Ok(42u32)
            })
            .unwrap();
        assert_eq!(handle.poll(), JobStatus::Running);
        go_tx.send(()).unwrap();
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn poll_then_wait_returns_the_stored_result() {
        let runner = JobRunner::new(Duration::from_secs(5));
        let mut handle = runner.submit(JobKind::Export, "table", || Ok("done")).unwrap();
        while handle.poll() == JobStatus::Running {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.poll(), JobStatus::Completed);
        assert_eq!(handle.wait().unwrap(), "done");
    }

    #[test]
    fn failed_job_surfaces_its_error() {
        let runner = JobRunner::new(Duration::from_secs(5));
        let handle = runner
            .submit(JobKind::Export, "sample", || -> Result<()> {
                Err(PipelineError::EmptyRegion { region: "Gotland".into() })
            })
            .unwrap();
        assert!(matches!(handle.wait(), Err(PipelineError::EmptyRegion { .. })));
    }

    #[test]
    fn interactive_wait_is_bounded() {
        let runner = JobRunner::new(Duration::from_millis(20));
        let err = runner
            .interactive("collection size", || {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::InteractiveTimeout { .. }), "got {err:?}");
    }

    #[test]
    fn ids_are_unique() {
        let runner = JobRunner::new(Duration::from_secs(1));
        let a = runner.submit(JobKind::Interactive, "a", || Ok(())).unwrap();
        let b = runner.submit(JobKind::Interactive, "b", || Ok(())).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.kind(), JobKind::Interactive);
    }

    #[test]
    fn panicking_worker_is_reported_as_lost() {
        let runner = JobRunner::new(Duration::from_secs(1));
        let handle = runner.submit(JobKind::Export, "boom", || -> Result<()> { panic!("worker died") }).unwrap();
        assert!(matches!(handle.wait(), Err(PipelineError::JobLost(_))));
    }
}
