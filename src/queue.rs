//! Task-queue boundary
//!
//! The dashboard offloads slow engine invocations (multi-year price
//! pulls, manager summaries) to a queue and polls for completion. The
//! engine only sees this interface: submit a job, poll its status, fetch
//! the serialized result. Jobs are not retried and cannot be cancelled
//! once started; timeouts are the caller's responsibility.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Queue-side lifecycle of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

pub type JobId = u64;

/// A queued engine invocation producing a serialized payload
pub type Job = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'static>>;

/// Message-passing contract between the UI layer and a worker
pub trait TaskQueue {
    fn submit(&self, job: Job) -> JobId;
    fn poll(&self, id: JobId) -> Option<JobStatus>;
    /// Result payload once `poll` reports finished or failed
    fn result(&self, id: JobId) -> Option<std::result::Result<Value, String>>;
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    outcome: Option<std::result::Result<Value, String>>,
}

/// In-process queue backed by the tokio runtime
///
/// Stands in for an external broker-backed worker during development and
/// tests; the status map is the single shared state, guarded coarsely.
#[derive(Clone, Default)]
pub struct LocalQueue {
    jobs: Arc<Mutex<HashMap<JobId, JobState>>>,
    next_id: Arc<AtomicU64>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_status(&self, id: JobId, status: JobStatus) {
        if let Some(state) = self.jobs.lock().unwrap().get_mut(&id) {
            state.status = status;
        }
    }
}

impl TaskQueue for LocalQueue {
    fn submit(&self, job: Job) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.jobs.lock().unwrap().insert(
            id,
            JobState {
                status: JobStatus::Queued,
                outcome: None,
            },
        );
        info!("Queued job {}", id);

        let queue = self.clone();
        tokio::spawn(async move {
            queue.set_status(id, JobStatus::Started);
            let outcome = job.await;

            let mut jobs = queue.jobs.lock().unwrap();
            let Some(state) = jobs.get_mut(&id) else {
                return;
            };
            match outcome {
                Ok(payload) => {
                    state.status = JobStatus::Finished;
                    state.outcome = Some(Ok(payload));
                    info!("Job {} finished", id);
                }
                Err(e) => {
                    // Failed jobs surface their message and are not retried
                    state.status = JobStatus::Failed;
                    state.outcome = Some(Err(format!("{e:#}")));
                    error!("Job {} failed: {e:#}", id);
                }
            }
        });

        id
    }

    fn poll(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.lock().unwrap().get(&id).map(|state| state.status)
    }

    fn result(&self, id: JobId) -> Option<std::result::Result<Value, String>> {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|state| state.outcome.clone())
    }
}
