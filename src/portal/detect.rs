//! Captive portal detection

use super::{is_provider_url, PortalSession, CONNECTIVITY_PROBE_URL};
use crate::error::PortalResult;
use crate::http::{parse_url, PortalRequest, Redirects};
use crate::models::CaptivePortalInfo;
use crate::parser;
use reqwest::StatusCode;

pub struct CaptiveDetector<'a> {
    session: &'a PortalSession,
}

impl<'a> CaptiveDetector<'a> {
    pub fn new(session: &'a PortalSession) -> Self {
        Self { session }
    }

    /// Classify the current network.
    ///
    /// An `Err` means detection itself failed and says nothing about the
    /// network; it is never the same thing as `NotCaptive`.
    pub async fn detect(&self) -> PortalResult<CaptivePortalInfo> {
        if !self.session.link.is_wifi_active().await {
            tracing::info!("Active network is not WiFi");
            return Ok(CaptivePortalInfo::not_captive());
        }
        self.session.refresh_nameserver().await;

        let probe_url = parse_url(CONNECTIVITY_PROBE_URL)?;
        let probe = self
            .session
            .transport
            .send(PortalRequest::get(probe_url), Redirects::Manual)
            .await?;

        if probe.status == StatusCode::NO_CONTENT {
            return Ok(CaptivePortalInfo::not_captive());
        }

        let location = match probe.location {
            Some(location) if is_provider_url(&location) => location,
            other => {
                tracing::info!("Not a ČD WiFi redirect (status {}, location {:?})", probe.status, other);
                return Ok(CaptivePortalInfo::unknown_portal(other));
            }
        };

        // must be absolute; anything else cannot name the gateway
        let home_url = parse_url(&location)?;
        tracing::debug!("Redirected to ČD WiFi gateway at {}", home_url);

        let page = self
            .session
            .transport
            .send(PortalRequest::get(home_url.clone()), Redirects::Follow)
            .await?;

        if parser::is_legacy_login_page(&page.body) {
            Ok(CaptivePortalInfo::legacy_form(home_url.as_str()))
        } else {
            Ok(CaptivePortalInfo::redirect_token(home_url.as_str()))
        }
    }
}
