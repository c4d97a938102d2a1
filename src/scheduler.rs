//! Retry scheduling
//!
//! At most one attempt runs at a time. Its progress and result are published
//! on a watch channel, and when it finishes the next automatic attempt is
//! requested from the host [`Scheduler`] after a delay picked from the
//! outcome.

use crate::config::RetryConfig;
use crate::models::{AttemptOutcome, ErrorKind, ProgressState};
use crate::orchestrator::{LoginOrchestrator, ProgressSink};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Host facility that actually runs attempts
pub trait Scheduler: Send + Sync {
    /// Start an attempt now unless one is already running
    fn run_now(&self);

    /// Next automatic attempt, subject to the captive-network gate
    fn schedule_after(&self, delay: Duration);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub success: Duration,
    pub timeout: Duration,
    pub failure: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            success: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
            failure: Duration::from_secs(300),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            success: cfg.success(),
            timeout: cfg.timeout(),
            failure: cfg.failure(),
        }
    }
}

impl RetryPolicy {
    pub fn next_delay(&self, outcome: &AttemptOutcome) -> Duration {
        if outcome.succeeded {
            self.success
        } else if outcome.timed_out {
            self.timeout
        } else {
            self.failure
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Automatic,
    Manual,
}

/// The current (or last) attempt as seen by observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryJob {
    pub id: u64,
    pub trigger: Trigger,
    pub progress: ProgressState,
    pub outcome: Option<AttemptOutcome>,
}

impl RetryJob {
    pub fn is_running(&self) -> bool {
        self.outcome.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started(u64),
    /// An attempt was already running; the request joined it
    Coalesced(u64),
}

pub struct RetryScheduler {
    policy: RetryPolicy,
    scheduler: Arc<dyn Scheduler>,
    next_id: AtomicU64,
    job: watch::Sender<Option<RetryJob>>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy, scheduler: Arc<dyn Scheduler>) -> Self {
        let (job, _) = watch::channel(None);
        Self {
            policy,
            scheduler,
            next_id: AtomicU64::new(0),
            job,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RetryJob>> {
        self.job.subscribe()
    }

    pub fn current(&self) -> Option<RetryJob> {
        self.job.borrow().clone()
    }

    /// Register a new attempt, or join the one already running
    pub fn admit(&self, trigger: Trigger) -> Admission {
        let mut admission = Admission::Coalesced(0);
        self.job.send_if_modified(|job| {
            if let Some(running) = job.as_ref().filter(|j| j.is_running()) {
                admission = Admission::Coalesced(running.id);
                return false;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            *job = Some(RetryJob {
                id,
                trigger,
                progress: ProgressState::NotStarted,
                outcome: None,
            });
            admission = Admission::Started(id);
            true
        });
        admission
    }

    /// Progress only moves forward, and only for the running attempt
    pub fn advance(&self, id: u64, progress: ProgressState) {
        self.job.send_if_modified(|job| match job {
            Some(job) if job.id == id && job.is_running() && progress > job.progress => {
                job.progress = progress;
                true
            }
            _ => false,
        });
    }

    /// Record the outcome and schedule the next automatic attempt
    pub fn finish(&self, id: u64, outcome: AttemptOutcome) -> Duration {
        self.job.send_if_modified(|job| match job {
            Some(job) if job.id == id && job.is_running() => {
                job.progress = ProgressState::Done;
                job.outcome = Some(outcome);
                true
            }
            _ => false,
        });

        let delay = self.policy.next_delay(&outcome);
        tracing::info!(
            "Attempt {} finished (success: {}), next automatic attempt in {}s",
            id,
            outcome.succeeded,
            delay.as_secs()
        );
        self.scheduler.schedule_after(delay);
        delay
    }

    /// Run an admitted attempt to completion.
    ///
    /// The attempt runs in its own task, so a panic inside it still ends in
    /// an outcome and a rescheduled retry.
    pub async fn run(self: Arc<Self>, id: u64, orchestrator: Arc<LoginOrchestrator>) -> AttemptOutcome {
        let progress = JobProgress {
            retry: self.clone(),
            id,
        };
        let task = tokio::spawn(async move { orchestrator.run(&progress).await });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Attempt {} aborted: {}", id, e);
                AttemptOutcome::failure(ErrorKind::Unknown)
            }
        };
        self.finish(id, outcome);
        outcome
    }
}

/// Forwards orchestrator progress into the job record
struct JobProgress {
    retry: Arc<RetryScheduler>,
    id: u64,
}

impl ProgressSink for JobProgress {
    fn publish(&self, progress: ProgressState) {
        self.retry.advance(self.id, progress);
    }
}
