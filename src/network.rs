//! Link state and network-path pinning
//!
//! Everything here is read from NetworkManager (`nmcli`) and the routing
//! table (`ip route`); nothing in this crate changes network configuration.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use tokio::process::Command;

/// A network the process can be pinned to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiNetwork {
    pub interface: String,
}

/// Read-only view of the current link
#[async_trait]
pub trait LinkInfo: Send + Sync {
    /// Whether the bound (or else default) network path runs over WiFi
    async fn is_wifi_active(&self) -> bool;

    /// DNS servers of the bound (or else default) network, in order
    async fn dns_servers(&self) -> Vec<IpAddr>;

    /// Default gateway of the bound (or else default) network
    async fn default_gateway(&self) -> Option<IpAddr>;

    /// A connected WiFi network that is held behind a captive portal
    async fn captive_wifi(&self) -> Option<WifiNetwork>;

    /// Ask the system to re-evaluate connectivity after a login
    async fn report_connectivity(&self) {}
}

/// Process-wide network-path override
pub trait NetworkPath: Send + Sync {
    /// Pin the process to `network`, or clear the pin with `None`
    fn bind(&self, network: Option<&WifiNetwork>);

    fn bound(&self) -> Option<WifiNetwork>;
}

/// In-process path override
///
/// HTTP clients read the pinned interface before each request and bind
/// their sockets to it.
#[derive(Default)]
pub struct ProcessPath {
    bound: RwLock<Option<WifiNetwork>>,
}

impl ProcessPath {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NetworkPath for ProcessPath {
    fn bind(&self, network: Option<&WifiNetwork>) {
        let mut bound = self.bound.write().unwrap_or_else(|p| p.into_inner());
        *bound = network.cloned();
    }

    fn bound(&self) -> Option<WifiNetwork> {
        self.bound.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Pins the process to a captive network for as long as it is alive.
///
/// Dropping the guard clears the pin exactly once, whichever way the
/// attempt ends.
pub struct PathPin<'a> {
    path: &'a dyn NetworkPath,
}

impl<'a> PathPin<'a> {
    pub fn acquire(path: &'a dyn NetworkPath, network: Option<&WifiNetwork>) -> Self {
        match network {
            Some(net) => {
                tracing::info!("Forcing use of captive WiFi network on {}", net.interface);
                path.bind(Some(net));
            }
            None => {
                tracing::warn!("No captive WiFi network found, using default connectivity");
            }
        }
        Self { path }
    }
}

impl Drop for PathPin<'_> {
    fn drop(&mut self) {
        self.path.bind(None);
    }
}

/// Device row from `nmcli -t -f DEVICE,TYPE,STATE device`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Device {
    name: String,
    kind: String,
    state: String,
}

/// NetworkManager-backed link information
pub struct NmcliLink {
    path: Arc<dyn NetworkPath>,
}

impl NmcliLink {
    pub fn new(path: Arc<dyn NetworkPath>) -> Self {
        Self { path }
    }

    async fn run(program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", program))?;
        if !output.status.success() {
            bail!(
                "{} {} exited with {}",
                program,
                args.join(" "),
                output.status
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn devices(&self) -> Result<Vec<Device>> {
        let out = Self::run("nmcli", &["-t", "-f", "DEVICE,TYPE,STATE", "device"]).await?;
        Ok(parse_devices(&out))
    }

    /// The pinned interface, else the one carrying the default route
    async fn current_interface(&self) -> Option<String> {
        if let Some(bound) = self.path.bound() {
            return Some(bound.interface);
        }
        match Self::run("ip", &["-o", "route", "show", "default"]).await {
            Ok(out) => parse_default_route_device(&out),
            Err(e) => {
                tracing::warn!("Failed to read default route: {:#}", e);
                None
            }
        }
    }

    async fn device_details(&self) -> Option<DeviceDetails> {
        let interface = self.current_interface().await?;
        match Self::run(
            "nmcli",
            &["-t", "-f", "IP4.DNS,IP4.GATEWAY", "device", "show", &interface],
        )
        .await
        {
            Ok(out) => Some(parse_device_show(&out)),
            Err(e) => {
                tracing::warn!("Failed to read IP config of {}: {:#}", interface, e);
                None
            }
        }
    }
}

#[async_trait]
impl LinkInfo for NmcliLink {
    async fn is_wifi_active(&self) -> bool {
        let Some(interface) = self.current_interface().await else {
            return false;
        };
        match self.devices().await {
            Ok(devices) => devices
                .iter()
                .any(|d| d.name == interface && d.kind == "wifi"),
            Err(e) => {
                tracing::warn!("Failed to list devices: {:#}", e);
                false
            }
        }
    }

    async fn dns_servers(&self) -> Vec<IpAddr> {
        self.device_details()
            .await
            .map(|d| d.dns)
            .unwrap_or_default()
    }

    async fn default_gateway(&self) -> Option<IpAddr> {
        self.device_details().await.and_then(|d| d.gateway)
    }

    async fn captive_wifi(&self) -> Option<WifiNetwork> {
        let connectivity = match Self::run("nmcli", &["networking", "connectivity"]).await {
            Ok(out) => out.trim().to_string(),
            Err(e) => {
                tracing::warn!("Failed to query connectivity: {:#}", e);
                return None;
            }
        };
        if connectivity != "portal" {
            tracing::debug!("Connectivity state: {}", connectivity);
            return None;
        }

        let devices = self.devices().await.ok()?;
        devices
            .into_iter()
            .find(|d| d.kind == "wifi" && d.state == "connected")
            .map(|d| WifiNetwork { interface: d.name })
    }

    async fn report_connectivity(&self) {
        if let Err(e) = Self::run("nmcli", &["networking", "connectivity", "check"]).await {
            tracing::debug!("Connectivity re-check failed: {:#}", e);
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct DeviceDetails {
    dns: Vec<IpAddr>,
    gateway: Option<IpAddr>,
}

fn parse_devices(out: &str) -> Vec<Device> {
    out.lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, ':');
            Some(Device {
                name: fields.next()?.to_string(),
                kind: fields.next()?.to_string(),
                state: fields.next()?.to_string(),
            })
        })
        .collect()
}

/// First `dev` of `ip -o route show default`; the kernel lists the
/// lowest metric first.
fn parse_default_route_device(out: &str) -> Option<String> {
    out.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|t| *t == "dev")?;
        tokens.next().map(str::to_string)
    })
}

fn parse_device_show(out: &str) -> DeviceDetails {
    let mut details = DeviceDetails::default();
    for line in out.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key.starts_with("IP4.DNS") {
            if let Ok(ip) = value.parse() {
                details.dns.push(ip);
            }
        } else if key == "IP4.GATEWAY" {
            details.gateway = value.parse().ok();
        }
    }
    details
}
