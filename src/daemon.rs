//! Daemon driver: runs attempts when asked and on the retry timer

use crate::network::LinkInfo;
use crate::orchestrator::LoginOrchestrator;
use crate::scheduler::{Admission, RetryScheduler, Scheduler, Trigger};
use crate::status::StatusBoard;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RunNow,
    ScheduleAfter(Duration),
}

/// [`Scheduler`] backed by the daemon loop
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            tracing::debug!("Daemon loop is gone, dropping {:?}", command);
        }
    }
}

impl Scheduler for SchedulerHandle {
    fn run_now(&self) {
        self.send(Command::RunNow);
    }

    fn schedule_after(&self, delay: Duration) {
        self.send(Command::ScheduleAfter(delay));
    }
}

pub struct Daemon {
    retry: Arc<RetryScheduler>,
    orchestrator: Arc<LoginOrchestrator>,
    link: Arc<dyn LinkInfo>,
    check_interval: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Daemon {
    pub fn new(
        retry: Arc<RetryScheduler>,
        orchestrator: Arc<LoginOrchestrator>,
        link: Arc<dyn LinkInfo>,
        check_interval: Duration,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            retry,
            orchestrator,
            link,
            check_interval,
            commands,
        }
    }

    /// Drive attempts until `shutdown` completes.
    ///
    /// An automatic attempt is due right away; after that the due time
    /// comes from the retry delays. A due attempt only starts while a
    /// captive WiFi network is connected, which is re-checked every
    /// `check_interval`.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let watcher = tokio::spawn(watch_status(self.retry.clone()));
        let mut due = Some(Instant::now());

        loop {
            let deadline = due;
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutting down");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(Command::RunNow) => {
                        if self.start(Trigger::Manual) {
                            due = None;
                        }
                    }
                    Some(Command::ScheduleAfter(delay)) => {
                        due = Some(Instant::now() + delay);
                    }
                    None => break,
                },
                _ = timer => {
                    if self.link.captive_wifi().await.is_some() {
                        self.start(Trigger::Automatic);
                        due = None;
                    } else {
                        tracing::debug!("No captive WiFi, checking again in {}s", self.check_interval.as_secs());
                        due = Some(Instant::now() + self.check_interval);
                    }
                }
            }
        }

        watcher.abort();
    }

    fn start(&self, trigger: Trigger) -> bool {
        match self.retry.admit(trigger) {
            Admission::Started(id) => {
                tracing::info!("Starting attempt {} ({:?})", id, trigger);
                tokio::spawn(self.retry.clone().run(id, self.orchestrator.clone()));
                true
            }
            Admission::Coalesced(id) => {
                tracing::info!("Attempt {} already running", id);
                false
            }
        }
    }
}

async fn watch_status(retry: Arc<RetryScheduler>) {
    let mut updates = retry.subscribe();
    let mut board = StatusBoard::default();
    let mut last = String::new();

    while updates.changed().await.is_ok() {
        let job = updates.borrow_and_update().clone();
        if let Some(text) = board.render(job.as_ref()) {
            if text != last {
                tracing::info!(status = %text, "Status changed");
                last = text;
            }
        }
    }
}
