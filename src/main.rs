//! cdlogin - Auto-login client for the ČD WiFi captive portal
//!
//! Detects the portal behind the connected WiFi network and runs the
//! matching login handshake, either once or as a daemon that retries on a
//! timer.

mod config;
mod daemon;
mod dns;
mod error;
mod http;
mod models;
mod network;
mod notify;
mod orchestrator;
mod parser;
mod portal;
mod scheduler;
mod status;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use daemon::{Daemon, SchedulerHandle};
use dns::{HickoryBackend, NameResolver};
use http::PortalHttpClient;
use models::CaptivePortalInfo;
use network::{LinkInfo, NetworkPath, NmcliLink, PathPin, ProcessPath};
use notify::{CommandNotifier, Notifier};
use orchestrator::LoginOrchestrator;
use portal::{CaptiveDetector, PortalSession};
use scheduler::{Admission, RetryJob, RetryPolicy, RetryScheduler, Scheduler, Trigger};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cdlogin")]
#[command(about = "ČD WiFi captive portal auto login", long_about = None)]
struct Args {
    /// Run in daemon mode (retry on a timer, SIGUSR1 forces an attempt)
    #[arg(short, long)]
    daemon: bool,

    /// Config file path (default: config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Only classify the current network, do not log in
    #[arg(long, conflicts_with = "daemon")]
    detect_only: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let cfg = config::Config::load(args.config.as_deref())?;
    init_logging(&cfg.logging)?;

    tracing::info!("cdlogin v{} - ČD WiFi auto login", env!("CARGO_PKG_VERSION"));

    let path: Arc<dyn NetworkPath> = Arc::new(ProcessPath::new());
    let link: Arc<dyn LinkInfo> = Arc::new(NmcliLink::new(path.clone()));
    let resolver = NameResolver::new(Arc::new(HickoryBackend::new(
        Duration::from_secs(cfg.dns.timeout),
        cfg.dns.attempts,
    )));
    let transport = Arc::new(PortalHttpClient::new(&cfg.http, resolver.clone(), path.clone()));
    let session = PortalSession::new(link.clone(), resolver, transport);

    if args.detect_only {
        return detect_only(&session, path.as_ref(), args.json).await;
    }

    let notifier = cfg
        .notifications
        .enabled
        .then(|| Arc::new(CommandNotifier::new(cfg.notifications.command.clone())) as Arc<dyn Notifier>);
    let orchestrator = Arc::new(LoginOrchestrator::new(session, path, notifier));
    let policy = RetryPolicy::from(&cfg.retry);

    if args.daemon {
        run_daemon(&cfg, policy, link, orchestrator).await?;
        Ok(ExitCode::SUCCESS)
    } else {
        run_once(policy, orchestrator, args.json).await
    }
}

fn init_logging(cfg: &config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    if cfg.log_file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.log_file)
            .with_context(|| format!("Failed to open log file {}", cfg.log_file))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

/// Scheduler for one-shot runs: there is no next attempt to run
struct Detached;

impl Scheduler for Detached {
    fn run_now(&self) {}

    fn schedule_after(&self, delay: Duration) {
        tracing::debug!("Not running as daemon, skipping retry in {}s", delay.as_secs());
    }
}

#[derive(Serialize)]
struct Report<'a> {
    job: Option<RetryJob>,
    status: &'a str,
    retry_after_secs: u64,
}

/// Run once, with the user watching
async fn run_once(
    policy: RetryPolicy,
    orchestrator: Arc<LoginOrchestrator>,
    json: bool,
) -> Result<ExitCode> {
    orchestrator.set_foreground(true);
    let retry = Arc::new(RetryScheduler::new(policy.clone(), Arc::new(Detached)));

    let Admission::Started(id) = retry.admit(Trigger::Manual) else {
        anyhow::bail!("An attempt is already running");
    };
    let outcome = retry.clone().run(id, orchestrator).await;
    let status = status::outcome_text(&outcome);

    if json {
        let report = Report {
            job: retry.current(),
            status,
            retry_after_secs: policy.next_delay(&outcome).as_secs(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", status);
    }

    Ok(if outcome.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn detect_only(
    session: &PortalSession,
    path: &dyn NetworkPath,
    json: bool,
) -> Result<ExitCode> {
    let captive = session.link.captive_wifi().await;
    let detected = {
        let _pin = PathPin::acquire(path, captive.as_ref());
        CaptiveDetector::new(session).detect().await
    };

    let info: CaptivePortalInfo = match detected {
        Ok(info) => info,
        Err(e) => {
            tracing::error!("Captive portal detection failed: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    if info.variant().is_provider() {
        tracing::info!("ČD WiFi portal found, an attempt would log in");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        match info.home_url() {
            Some(url) => println!("{} ({})", info.variant(), url),
            None => println!("{}", info.variant()),
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Run in daemon mode until Ctrl-C or SIGTERM
async fn run_daemon(
    cfg: &config::Config,
    policy: RetryPolicy,
    link: Arc<dyn LinkInfo>,
    orchestrator: Arc<LoginOrchestrator>,
) -> Result<()> {
    tracing::info!("Starting daemon mode...");
    tracing::info!("Captive network check interval: {}s", cfg.global.check_interval);
    tracing::info!(
        "Retry delays: success {}s, timeout {}s, failure {}s",
        policy.success.as_secs(),
        policy.timeout.as_secs(),
        policy.failure.as_secs()
    );

    let (handle, commands) = SchedulerHandle::channel();
    let retry = Arc::new(RetryScheduler::new(policy, Arc::new(handle.clone())));
    let daemon = Daemon::new(
        retry,
        orchestrator,
        link,
        Duration::from_secs(cfg.global.check_interval),
        commands,
    );

    listen_for_run_now(handle)?;
    daemon.run(shutdown_signal()?).await;
    Ok(())
}

#[cfg(unix)]
fn listen_for_run_now(handle: SchedulerHandle) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1()).context("Failed to listen for SIGUSR1")?;
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            tracing::info!("SIGUSR1 received, running an attempt now");
            handle.run_now();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn listen_for_run_now(_handle: SchedulerHandle) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    Ok(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}
