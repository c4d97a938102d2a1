//! Name resolution against an explicit nameserver
//!
//! While the portal session is unauthenticated the system resolver may be
//! unreachable (DNS-over-TLS setups are blocked until login), so every
//! hostname the portal client needs is resolved here, against the nameserver
//! the current link advertises (or its default gateway).

use crate::error::{PortalError, PortalResult};
use anyhow::Result;
use async_trait::async_trait;
use hickory_resolver::{
    config::{NameServerConfigGroup, ResolveHosts, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    TokioResolver,
};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Sends A-record queries to a given nameserver
#[async_trait]
pub trait DnsBackend: Send + Sync {
    /// `Ok(vec![])` means the server answered without any A record.
    async fn lookup_a(&self, nameserver: IpAddr, host: &str) -> Result<Vec<Ipv4Addr>>;
}

/// Plain DNS (port 53) through hickory
pub struct HickoryBackend {
    timeout: Duration,
    attempts: usize,
    port: u16,
}

impl HickoryBackend {
    pub fn new(timeout: Duration, attempts: usize) -> Self {
        Self {
            timeout,
            attempts,
            port: 53,
        }
    }

    /// Only the nameserver is asked; `/etc/hosts` is never read.
    fn options(&self) -> ResolverOpts {
        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = self.attempts;
        opts.use_hosts_file = ResolveHosts::Never;
        opts
    }

    fn resolver_for(&self, nameserver: IpAddr) -> TokioResolver {
        let config = ResolverConfig::from_parts(
            None,
            vec![],
            NameServerConfigGroup::from_ips_clear(&[nameserver], self.port, true),
        );
        TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(self.options())
            .build()
    }
}

#[async_trait]
impl DnsBackend for HickoryBackend {
    async fn lookup_a(&self, nameserver: IpAddr, host: &str) -> Result<Vec<Ipv4Addr>> {
        let response = self.resolver_for(nameserver).ipv4_lookup(host).await?;
        Ok(response.iter().map(|a| a.0).collect())
    }
}

/// Resolver with a single, replaceable nameserver slot
///
/// Clones share the slot, so the copy handed to reqwest sees every
/// [`set_nameserver`](Self::set_nameserver) made by the detector and the
/// login strategies.
#[derive(Clone)]
pub struct NameResolver {
    nameserver: Arc<RwLock<Option<IpAddr>>>,
    backend: Arc<dyn DnsBackend>,
}

impl NameResolver {
    pub fn new(backend: Arc<dyn DnsBackend>) -> Self {
        Self {
            nameserver: Arc::new(RwLock::new(None)),
            backend,
        }
    }

    pub fn set_nameserver(&self, address: IpAddr) {
        let mut slot = self
            .nameserver
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *slot != Some(address) {
            tracing::debug!("Using nameserver {}", address);
        }
        *slot = Some(address);
    }

    pub fn nameserver(&self) -> Option<IpAddr> {
        *self
            .nameserver
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn resolve(&self, hostname: &str) -> PortalResult<Vec<IpAddr>> {
        if let Some(ip) = parse_ip_literal(hostname) {
            return Ok(vec![ip]);
        }

        let failed = |reason: String| PortalError::Resolution {
            host: hostname.to_string(),
            reason,
        };

        let nameserver = self
            .nameserver()
            .ok_or_else(|| failed("no nameserver configured".to_string()))?;

        let addresses = self
            .backend
            .lookup_a(nameserver, hostname)
            .await
            .map_err(|e| {
                tracing::warn!("DNS query for {} via {} failed: {:#}", hostname, nameserver, e);
                failed(format!("no response from {}: {:#}", nameserver, e))
            })?;

        if addresses.is_empty() {
            return Err(failed(format!("no A records from {}", nameserver)));
        }

        tracing::debug!("{} -> {:?} (via {})", hostname, addresses, nameserver);
        Ok(addresses.into_iter().map(IpAddr::V4).collect())
    }
}

impl Resolve for NameResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let addresses = NameResolver::resolve(&resolver, name.as_str()).await?;
            // reqwest replaces the port with the one from the URL
            let addrs: Addrs = Box::new(
                addresses
                    .into_iter()
                    .map(|ip| SocketAddr::new(ip, 0)),
            );
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

fn parse_ip_literal(hostname: &str) -> Option<IpAddr> {
    let bare = hostname
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(hostname);
    bare.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDns;
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn test_literal_addresses_skip_query() {
        let dns = Arc::new(FakeDns::answering(vec!["10.0.0.1".parse().unwrap()]));
        let resolver = NameResolver::new(dns.clone());
        resolver.set_nameserver("10.0.0.53".parse().unwrap());

        for literal in ["192.0.2.1", "::1", "[fe80::1]", "2001:db8::42"] {
            let resolved = resolver.resolve(literal).await.unwrap();
            let expected: IpAddr = literal.trim_matches(['[', ']']).parse().unwrap();
            assert_eq!(resolved, vec![expected]);
        }
        assert_eq!(dns.queries(), 0);
    }

    #[tokio::test]
    async fn test_hex_looking_hostname_is_queried() {
        let dns = Arc::new(FakeDns::answering(vec!["10.0.0.7".parse().unwrap()]));
        let resolver = NameResolver::new(dns.clone());
        resolver.set_nameserver("10.0.0.53".parse().unwrap());

        let resolved = resolver.resolve("cafe").await.unwrap();
        assert_eq!(resolved, vec!["10.0.0.7".parse::<IpAddr>().unwrap()]);
        assert_eq!(dns.queries(), 1);
    }

    #[tokio::test]
    async fn test_uses_configured_nameserver() {
        let dns = Arc::new(FakeDns::answering(vec![
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
        ]));
        let resolver = NameResolver::new(dns.clone());
        resolver.set_nameserver("10.0.0.53".parse().unwrap());

        let resolved = resolver.resolve("cdwifi.cz").await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(dns.last_nameserver(), Some("10.0.0.53".parse().unwrap()));

        resolver.set_nameserver("172.16.0.1".parse().unwrap());
        resolver.resolve("cdwifi.cz").await.unwrap();
        assert_eq!(dns.last_nameserver(), Some("172.16.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_empty_answer_is_failure() {
        let dns = Arc::new(FakeDns::answering(vec![]));
        let resolver = NameResolver::new(dns);
        resolver.set_nameserver("10.0.0.53".parse().unwrap());

        let err = resolver.resolve("cdwifi.cz").await.unwrap_err();
        assert!(matches!(err, PortalError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_no_response_is_failure() {
        let dns = Arc::new(FakeDns::silent());
        let resolver = NameResolver::new(dns);
        resolver.set_nameserver("10.0.0.53".parse().unwrap());

        let err = resolver.resolve("cdwifi.cz").await.unwrap_err();
        assert!(matches!(err, PortalError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_missing_nameserver_is_failure() {
        let dns = Arc::new(FakeDns::answering(vec!["10.0.0.1".parse().unwrap()]));
        let resolver = NameResolver::new(dns.clone());

        assert!(resolver.resolve("cdwifi.cz").await.is_err());
        assert_eq!(dns.queries(), 0);
    }

    #[test]
    fn test_clones_share_nameserver() {
        let resolver = NameResolver::new(Arc::new(FakeDns::silent()));
        let handed_to_client = resolver.clone();
        resolver.set_nameserver("10.1.1.1".parse().unwrap());
        assert_eq!(handed_to_client.nameserver(), Some("10.1.1.1".parse().unwrap()));
    }

    /// Answers every query with `rcode` and the given A records
    async fn dns_responder(rcode: u8, answers: Vec<Ipv4Addr>) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let reply = dns_reply(&buf[..len], rcode, &answers);
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        port
    }

    fn dns_reply(query: &[u8], rcode: u8, answers: &[Ipv4Addr]) -> Vec<u8> {
        // question: labels up to the root label, then QTYPE and QCLASS
        let mut end = 12;
        while query[end] != 0 {
            end += 1 + query[end] as usize;
        }
        end += 5;

        let mut reply = Vec::new();
        reply.extend_from_slice(&query[..2]);
        reply.push(0x80 | (query[2] & 0x01));
        reply.push(0x80 | rcode);
        reply.extend_from_slice(&[0, 1]);
        reply.extend_from_slice(&(answers.len() as u16).to_be_bytes());
        reply.extend_from_slice(&[0, 0, 0, 0]);
        reply.extend_from_slice(&query[12..end]);
        for ip in answers {
            reply.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4]);
            reply.extend_from_slice(&ip.octets());
        }
        reply
    }

    fn local_resolver(port: u16) -> NameResolver {
        let backend = HickoryBackend {
            port,
            ..HickoryBackend::new(Duration::from_secs(2), 1)
        };
        let resolver = NameResolver::new(Arc::new(backend));
        resolver.set_nameserver("127.0.0.1".parse().unwrap());
        resolver
    }

    #[test]
    fn test_hickory_backend_skips_hosts_file() {
        let backend = HickoryBackend::new(Duration::from_secs(2), 3);
        let opts = backend.options();
        assert_eq!(opts.use_hosts_file, ResolveHosts::Never);
        assert_eq!(opts.timeout, Duration::from_secs(2));
        assert_eq!(opts.attempts, 3);
    }

    #[tokio::test]
    async fn test_hickory_backend_a_records() {
        let port = dns_responder(0, vec!["10.20.30.40".parse().unwrap()]).await;
        let resolved = local_resolver(port).resolve("cdwifi.cz").await.unwrap();
        assert_eq!(resolved, vec!["10.20.30.40".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_hickory_backend_nxdomain_is_failure() {
        let port = dns_responder(3, vec![]).await;
        let err = local_resolver(port).resolve("cdwifi.cz").await.unwrap_err();
        assert!(matches!(err, PortalError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_hickory_backend_empty_answer_is_failure() {
        let port = dns_responder(0, vec![]).await;
        let err = local_resolver(port).resolve("cdwifi.cz").await.unwrap_err();
        assert!(matches!(err, PortalError::Resolution { .. }));
    }
}
