//! ČD WiFi captive portal handling
//!
//! Detection classifies the portal into a [`PortalVariant`]; each provider
//! variant has its own [`LoginStrategy`], picked through [`strategy_for`].
//! Supporting another handshake means adding a variant and a row to that
//! table.

pub mod detect;
pub mod legacy;
pub mod token;

pub use detect::CaptiveDetector;
pub use legacy::LegacyFormLogin;
pub use token::RedirectTokenLogin;

use crate::dns::NameResolver;
use crate::error::PortalResult;
use crate::http::PortalTransport;
use crate::models::{CaptivePortalInfo, PortalVariant};
use crate::network::LinkInfo;
use async_trait::async_trait;
use std::sync::Arc;

/// Answers 204 when there is unrestricted internet access
pub const CONNECTIVITY_PROBE_URL: &str = "http://connectivitycheck.gstatic.com/generate_204";

/// Marker identifying the provider in redirect targets
pub const PROVIDER_DOMAIN: &str = "cdwifi.cz";

/// Everything one attempt needs to talk to the portal
#[derive(Clone)]
pub struct PortalSession {
    pub link: Arc<dyn LinkInfo>,
    pub resolver: NameResolver,
    pub transport: Arc<dyn PortalTransport>,
}

impl PortalSession {
    pub fn new(
        link: Arc<dyn LinkInfo>,
        resolver: NameResolver,
        transport: Arc<dyn PortalTransport>,
    ) -> Self {
        Self {
            link,
            resolver,
            transport,
        }
    }

    /// Point the resolver at the link's first DNS server, or at the default
    /// gateway when the link advertises none.
    pub async fn refresh_nameserver(&self) {
        if let Some(server) = self.link.dns_servers().await.first() {
            self.resolver.set_nameserver(*server);
        } else if let Some(gateway) = self.link.default_gateway().await {
            tracing::debug!("No DNS servers on link, falling back to gateway {}", gateway);
            self.resolver.set_nameserver(gateway);
        } else {
            tracing::warn!("No DNS server or gateway found, keeping previous nameserver");
        }
    }
}

/// One provider login handshake
#[async_trait]
pub trait LoginStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(false)` means the portal answered but did not let us through.
    async fn login(&self, session: &PortalSession, info: &CaptivePortalInfo) -> PortalResult<bool>;
}

static LEGACY_FORM: LegacyFormLogin = LegacyFormLogin;
static REDIRECT_TOKEN: RedirectTokenLogin = RedirectTokenLogin;

/// Login handshake for each portal variant
pub fn strategy_for(variant: PortalVariant) -> Option<&'static dyn LoginStrategy> {
    match variant {
        PortalVariant::LegacyForm => Some(&LEGACY_FORM),
        PortalVariant::RedirectToken => Some(&REDIRECT_TOKEN),
        PortalVariant::NotCaptive | PortalVariant::UnknownPortal => None,
    }
}

pub(crate) fn is_provider_url(location: &str) -> bool {
    location.contains(PROVIDER_DOMAIN)
}
