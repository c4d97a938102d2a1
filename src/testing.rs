//! Test doubles for the host collaborators

use crate::dns::{DnsBackend, NameResolver};
use crate::error::{PortalError, PortalResult};
use crate::http::{PortalRequest, PortalResponse, PortalTransport, Redirects};
use crate::models::ProgressState;
use crate::network::{LinkInfo, NetworkPath, WifiNetwork};
use crate::notify::Notifier;
use crate::orchestrator::ProgressSink;
use crate::portal::PortalSession;
use crate::scheduler::Scheduler;
use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// DNS backend with a fixed answer, or none at all
pub struct FakeDns {
    answer: Option<Vec<Ipv4Addr>>,
    queries: AtomicUsize,
    last_nameserver: Mutex<Option<IpAddr>>,
}

impl FakeDns {
    pub fn answering(answer: Vec<Ipv4Addr>) -> Self {
        Self {
            answer: Some(answer),
            queries: AtomicUsize::new(0),
            last_nameserver: Mutex::new(None),
        }
    }

    /// Every query times out
    pub fn silent() -> Self {
        Self {
            answer: None,
            queries: AtomicUsize::new(0),
            last_nameserver: Mutex::new(None),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn last_nameserver(&self) -> Option<IpAddr> {
        *self.last_nameserver.lock().unwrap()
    }
}

#[async_trait]
impl DnsBackend for FakeDns {
    async fn lookup_a(&self, nameserver: IpAddr, _host: &str) -> anyhow::Result<Vec<Ipv4Addr>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        *self.last_nameserver.lock().unwrap() = Some(nameserver);
        self.answer.clone().ok_or_else(|| anyhow!("request timed out"))
    }
}

/// Path override that counts pins and unpins
#[derive(Default)]
pub struct CountingPath {
    bound: RwLock<Option<WifiNetwork>>,
    pins: AtomicUsize,
    unpins: AtomicUsize,
}

impl CountingPath {
    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }

    pub fn unpins(&self) -> usize {
        self.unpins.load(Ordering::SeqCst)
    }
}

impl NetworkPath for CountingPath {
    fn bind(&self, network: Option<&WifiNetwork>) {
        match network {
            Some(_) => self.pins.fetch_add(1, Ordering::SeqCst),
            None => self.unpins.fetch_add(1, Ordering::SeqCst),
        };
        *self.bound.write().unwrap() = network.cloned();
    }

    fn bound(&self) -> Option<WifiNetwork> {
        self.bound.read().unwrap().clone()
    }
}

pub struct FakeLink {
    wifi: bool,
    dns: Vec<IpAddr>,
    gateway: Option<IpAddr>,
    captive: Option<WifiNetwork>,
    reports: AtomicUsize,
}

impl FakeLink {
    /// WiFi link held behind a captive portal on `wlan0`
    pub fn wifi() -> Self {
        Self {
            wifi: true,
            dns: Vec::new(),
            gateway: None,
            captive: Some(WifiNetwork {
                interface: "wlan0".into(),
            }),
            reports: AtomicUsize::new(0),
        }
    }

    pub fn cellular() -> Self {
        Self {
            wifi: false,
            captive: None,
            ..Self::wifi()
        }
    }

    pub fn with_dns(mut self, servers: &[&str]) -> Self {
        self.dns = servers.iter().map(|s| s.parse().unwrap()).collect();
        self
    }

    pub fn with_gateway(mut self, gateway: &str) -> Self {
        self.gateway = Some(gateway.parse().unwrap());
        self
    }

    pub fn without_captive(mut self) -> Self {
        self.captive = None;
        self
    }

    pub fn reports(&self) -> usize {
        self.reports.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkInfo for FakeLink {
    async fn is_wifi_active(&self) -> bool {
        self.wifi
    }

    async fn dns_servers(&self) -> Vec<IpAddr> {
        self.dns.clone()
    }

    async fn default_gateway(&self) -> Option<IpAddr> {
        self.gateway
    }

    async fn captive_wifi(&self) -> Option<WifiNetwork> {
        self.captive.clone()
    }

    async fn report_connectivity(&self) {
        self.reports.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
enum Scripted {
    Respond(PortalResponse),
    Timeout,
    Unreachable,
    Broken,
    Panic,
}

#[derive(Default)]
struct Script {
    routes: Vec<(String, Scripted)>,
    requests: Vec<(PortalRequest, Redirects)>,
}

/// Transport answering from a script keyed by URL.
///
/// A URL matches its exact entry first, then the entry for the same URL
/// without its query string.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(code: u16) -> PortalResponse {
        PortalResponse {
            status: StatusCode::from_u16(code).unwrap(),
            location: None,
            body: String::new(),
        }
    }

    fn route(self, url: &str, scripted: Scripted) -> Self {
        self.script
            .lock()
            .unwrap()
            .routes
            .push((url.to_string(), scripted));
        self
    }

    pub fn respond(self, url: &str, response: PortalResponse) -> Self {
        self.route(url, Scripted::Respond(response))
    }

    /// Timeout when `timeout` is set, otherwise an unreachable host
    pub fn fail(self, url: &str, timeout: bool) -> Self {
        self.route(url, if timeout { Scripted::Timeout } else { Scripted::Unreachable })
    }

    /// The HTTP client itself is unusable for this URL
    pub fn broken(self, url: &str) -> Self {
        self.route(url, Scripted::Broken)
    }

    pub fn panic_on(self, url: &str) -> Self {
        self.route(url, Scripted::Panic)
    }

    pub fn requests(&self) -> Vec<(PortalRequest, Redirects)> {
        self.script.lock().unwrap().requests.clone()
    }

    fn lookup(&self, request: &PortalRequest, redirects: Redirects) -> Option<Scripted> {
        let mut script = self.script.lock().unwrap();
        script.requests.push((request.clone(), redirects));

        let url = request.url.as_str();
        let bare = url.split('?').next().unwrap_or(url);
        script
            .routes
            .iter()
            .find(|(u, _)| u == url)
            .or_else(|| script.routes.iter().find(|(u, _)| u == bare))
            .map(|(_, s)| s.clone())
    }
}

#[async_trait]
impl PortalTransport for ScriptedTransport {
    async fn send(&self, request: PortalRequest, redirects: Redirects) -> PortalResult<PortalResponse> {
        let url = request.url.to_string();
        // lock is released before a scripted panic so it cannot poison
        match self.lookup(&request, redirects) {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Timeout) => Err(PortalError::Timeout { url }),
            Some(Scripted::Broken) => Err(PortalError::Client("no TLS backend".into())),
            Some(Scripted::Panic) => panic!("scripted panic for {}", url),
            Some(Scripted::Unreachable) | None => Err(PortalError::Resolution {
                host: request.url.host_str().unwrap_or_default().to_string(),
                reason: "unreachable".into(),
            }),
        }
    }
}

impl PortalResponse {
    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }
}

pub fn session_with(link: FakeLink, transport: ScriptedTransport) -> PortalSession {
    session_sharing(Arc::new(link), transport)
}

/// Like [`session_with`], keeping a handle on the link
pub fn session_sharing(link: Arc<FakeLink>, transport: ScriptedTransport) -> PortalSession {
    let resolver = NameResolver::new(Arc::new(FakeDns::silent()));
    PortalSession::new(link, resolver, Arc::new(transport))
}

#[derive(Default)]
pub struct RecordingNotifier {
    successes: AtomicUsize,
    failures: AtomicUsize,
}

impl RecordingNotifier {
    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.successes() + self.failures()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn login_succeeded(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    async fn login_failed(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    states: Mutex<Vec<ProgressState>>,
}

impl RecordingProgress {
    pub fn states(&self) -> Vec<ProgressState> {
        self.states.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn publish(&self, progress: ProgressState) {
        self.states.lock().unwrap().push(progress);
    }
}

/// Scheduler that only records what it was asked to do
#[derive(Default)]
pub struct RecordingScheduler {
    run_now: AtomicUsize,
    delays: Mutex<Vec<Duration>>,
}

impl RecordingScheduler {
    pub fn run_now_calls(&self) -> usize {
        self.run_now.load(Ordering::SeqCst)
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn run_now(&self) {
        self.run_now.fetch_add(1, Ordering::SeqCst);
    }

    fn schedule_after(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}
