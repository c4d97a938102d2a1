//! Desktop notifications about login results

use async_trait::async_trait;
use tokio::process::Command;

const TITLE: &str = "ČD WiFi";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn login_succeeded(&self);
    async fn login_failed(&self);
}

/// Runs `<command> <title> <message>`, `notify-send` by default
pub struct CommandNotifier {
    command: String,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn show(&self, message: &str) {
        match Command::new(&self.command).args([TITLE, message]).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::warn!("{} exited with {}", self.command, status),
            Err(e) => tracing::warn!("Failed to run {}: {}", self.command, e),
        }
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn login_succeeded(&self) {
        self.show("Logged in, internet is available").await;
    }

    async fn login_failed(&self) {
        self.show("Automatic login failed").await;
    }
}
