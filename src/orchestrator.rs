//! One login attempt: detect, then run the matching handshake

use crate::error::PortalError;
use crate::models::{AttemptOutcome, ErrorKind, PortalVariant, ProgressState};
use crate::network::{NetworkPath, PathPin};
use crate::notify::Notifier;
use crate::portal::{self, CaptiveDetector, PortalSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives progress of the running attempt
pub trait ProgressSink: Send + Sync {
    fn publish(&self, progress: ProgressState);
}

pub struct LoginOrchestrator {
    session: PortalSession,
    path: Arc<dyn NetworkPath>,
    notifier: Option<Arc<dyn Notifier>>,
    foreground: AtomicBool,
}

impl LoginOrchestrator {
    pub fn new(
        session: PortalSession,
        path: Arc<dyn NetworkPath>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            session,
            path,
            notifier,
            foreground: AtomicBool::new(false),
        }
    }

    /// While the user is watching the result, notifications are skipped
    pub fn set_foreground(&self, visible: bool) {
        self.foreground.store(visible, Ordering::Relaxed);
    }

    /// Run one attempt. Never fails: every problem ends up in the outcome.
    pub async fn run(&self, progress: &dyn ProgressSink) -> AttemptOutcome {
        tracing::info!("Begin ČD WiFi login");
        progress.publish(ProgressState::Detecting);

        // a cellular path could otherwise answer the probe for us
        let captive = self.session.link.captive_wifi().await;
        let pin = PathPin::acquire(self.path.as_ref(), captive.as_ref());

        let outcome = self.attempt(progress).await;
        if outcome.succeeded {
            self.session.link.report_connectivity().await;
        }

        drop(pin);
        outcome
    }

    async fn attempt(&self, progress: &dyn ProgressSink) -> AttemptOutcome {
        let info = match CaptiveDetector::new(&self.session).detect().await {
            Ok(info) => info,
            Err(e) => {
                tracing::error!("Captive portal detection failed: {}", e);
                return Self::failed(ErrorKind::DetectionFailed, &e);
            }
        };
        tracing::info!("Captive portal detection result: {}", info.variant());

        let Some(strategy) = portal::strategy_for(info.variant()) else {
            return AttemptOutcome::failure(match info.variant() {
                PortalVariant::NotCaptive => ErrorKind::NotCaptive,
                _ => ErrorKind::NotThisProvider,
            });
        };

        progress.publish(ProgressState::LoggingIn);
        tracing::debug!("Logging in using the {} handshake", strategy.name());

        // only an answered login is worth a notification
        let succeeded = match strategy.login(&self.session, &info).await {
            Ok(succeeded) => succeeded,
            Err(e) => {
                tracing::error!("Login failed: {}", e);
                return Self::failed(ErrorKind::LoginFailed, &e);
            }
        };
        tracing::info!("Login success: {}", succeeded);

        self.notify(succeeded).await;
        if succeeded {
            AttemptOutcome::success()
        } else {
            AttemptOutcome::failure(ErrorKind::LoginFailed)
        }
    }

    fn failed(kind: ErrorKind, err: &PortalError) -> AttemptOutcome {
        if err.is_unexpected() {
            AttemptOutcome::failure(ErrorKind::Unknown)
        } else if err.is_timeout() {
            AttemptOutcome::timeout(kind)
        } else {
            AttemptOutcome::failure(kind)
        }
    }

    async fn notify(&self, succeeded: bool) {
        if self.foreground.load(Ordering::Relaxed) {
            return;
        }
        let Some(notifier) = &self.notifier else {
            return;
        };
        if succeeded {
            notifier.login_succeeded().await;
        } else {
            notifier.login_failed().await;
        }
    }
}
