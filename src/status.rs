//! User-facing status line

use crate::models::{AttemptOutcome, ProgressState};
use crate::scheduler::RetryJob;

pub const READY: &str = "Ready";

pub fn outcome_text(outcome: &AttemptOutcome) -> &'static str {
    match outcome.error_kind {
        _ if outcome.succeeded => "Logged in to ČD WiFi",
        Some(kind) => kind.message(),
        None => "Login finished",
    }
}

/// Turns job updates into status text.
///
/// The result of an attempt is shown once, to whoever watched it run;
/// after that the board falls back to [`READY`].
#[derive(Debug, Default)]
pub struct StatusBoard {
    watching: Option<u64>,
}

impl StatusBoard {
    /// `None` leaves the current text as it is
    pub fn render(&mut self, job: Option<&RetryJob>) -> Option<String> {
        match job {
            Some(job) if job.is_running() => {
                // admitted but not started yet
                if job.progress == ProgressState::NotStarted {
                    return None;
                }
                self.watching = Some(job.id);
                Some(job.progress.status_text().to_string())
            }
            Some(job) if self.watching == Some(job.id) => {
                self.watching = None;
                job.outcome.as_ref().map(|o| outcome_text(o).to_string())
            }
            _ => Some(READY.to_string()),
        }
    }
}
