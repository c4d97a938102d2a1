//! HTTP client for talking to the portal, with its own name resolution

use crate::config::HttpConfig;
use crate::dns::NameResolver;
use crate::error::{PortalError, PortalResult};
use crate::network::NetworkPath;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, LOCATION, USER_AGENT};
use reqwest::{redirect, Client, StatusCode, Url};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MAX_REDIRECTS: usize = 10;

/// Whether the client follows redirects or hands them back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirects {
    Follow,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    PostForm(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRequest {
    pub url: Url,
    pub method: Method,
}

impl PortalRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::Get,
        }
    }

    pub fn post_form(url: Url, fields: &[(&str, &str)]) -> Self {
        Self {
            url,
            method: Method::PostForm(
                fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }
}

/// Response with the body already read; nothing stays open after `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: String,
}

impl PortalResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Sends portal requests
#[async_trait]
pub trait PortalTransport: Send + Sync {
    async fn send(&self, request: PortalRequest, redirects: Redirects) -> PortalResult<PortalResponse>;
}

pub fn parse_url(url: &str) -> PortalResult<Url> {
    Url::parse(url).map_err(|source| PortalError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

struct ClientPair {
    interface: Option<String>,
    follow: Client,
    manual: Client,
}

/// reqwest-backed transport
///
/// Keeps two clients that differ only in redirect handling. Both resolve
/// through [`NameResolver`] and bind to the pinned interface, if any; the
/// pair is rebuilt when the pin changes.
pub struct PortalHttpClient {
    timeout: Duration,
    connect_timeout: Duration,
    resolver: NameResolver,
    path: Arc<dyn NetworkPath>,
    clients: Mutex<Option<ClientPair>>,
}

impl PortalHttpClient {
    pub fn new(cfg: &HttpConfig, resolver: NameResolver, path: Arc<dyn NetworkPath>) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout),
            connect_timeout: Duration::from_secs(cfg.connect_timeout),
            resolver,
            path,
            clients: Mutex::new(None),
        }
    }

    fn client(&self, redirects: Redirects) -> PortalResult<Client> {
        let interface = self.path.bound().map(|n| n.interface);
        let mut slot = self.clients.lock().unwrap_or_else(|p| p.into_inner());

        let stale = slot.as_ref().map_or(true, |pair| pair.interface != interface);
        if stale {
            tracing::debug!("Building HTTP clients (interface: {:?})", interface);
            *slot = Some(ClientPair {
                follow: self.build(interface.as_deref(), redirect::Policy::limited(MAX_REDIRECTS))?,
                manual: self.build(interface.as_deref(), redirect::Policy::none())?,
                interface,
            });
        }

        let pair = slot
            .as_ref()
            .ok_or_else(|| PortalError::Client("client pair missing".to_string()))?;
        Ok(match redirects {
            Redirects::Follow => pair.follow.clone(),
            Redirects::Manual => pair.manual.clone(),
        })
    }

    fn build(&self, interface: Option<&str>, policy: redirect::Policy) -> PortalResult<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("cdlogin/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("cs-CZ,cs;q=0.9,en;q=0.8"),
        );

        let builder = Client::builder()
            .dns_resolver(Arc::new(self.resolver.clone()))
            .no_proxy()
            .redirect(policy)
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .default_headers(headers);

        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        let builder = match interface {
            Some(name) => builder.interface(name),
            None => builder,
        };
        #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
        let builder = {
            if let Some(name) = interface {
                tracing::warn!("Binding to {} is not supported on this platform", name);
            }
            builder
        };

        builder
            .build()
            .map_err(|e| PortalError::Client(e.to_string()))
    }
}

#[async_trait]
impl PortalTransport for PortalHttpClient {
    async fn send(&self, request: PortalRequest, redirects: Redirects) -> PortalResult<PortalResponse> {
        let client = self.client(redirects)?;
        let url = request.url.to_string();

        let builder = match &request.method {
            Method::Get => client.get(request.url),
            Method::PostForm(fields) => client.post(request.url).form(fields),
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| PortalError::from_reqwest(&url, e))?;

        let status = resp.status();
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // consumes the response, releasing the connection on every path
        let body = resp
            .text()
            .await
            .map_err(|e| PortalError::from_reqwest(&url, e))?;

        tracing::debug!("{} -> {} (location: {:?})", url, status, location);
        Ok(PortalResponse {
            status,
            location,
            body,
        })
    }
}
