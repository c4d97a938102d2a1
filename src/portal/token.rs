//! Current ČD WiFi gateway: authentication by redirect
//!
//! The gateway never returns a body here. It answers the authenticate call
//! with a 307 to either the `url` or the `onerror` target we passed in; both
//! are only markers and are never fetched.

use super::{LoginStrategy, PortalSession};
use crate::error::PortalResult;
use crate::http::{parse_url, PortalRequest, Redirects};
use crate::models::CaptivePortalInfo;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};

const AUTHENTICATE_URL: &str =
    "http://cdwifi.cz/portal/api/vehicle/gateway/user/authenticate?ahoj=ceskedrahy";

pub const SUCCESS_MARKER: &str = "http://example.com/cdlogin/success";
pub const FAILURE_MARKER: &str = "http://example.org/cdlogin/failure";

pub struct RedirectTokenLogin;

impl RedirectTokenLogin {
    fn authenticate_url() -> PortalResult<Url> {
        let mut url = parse_url(AUTHENTICATE_URL)?;
        url.query_pairs_mut()
            .append_pair("category", "internet")
            .append_pair("url", SUCCESS_MARKER)
            .append_pair("onerror", FAILURE_MARKER);
        Ok(url)
    }
}

#[async_trait]
impl LoginStrategy for RedirectTokenLogin {
    fn name(&self) -> &'static str {
        "redirect token"
    }

    async fn login(&self, session: &PortalSession, _info: &CaptivePortalInfo) -> PortalResult<bool> {
        session.refresh_nameserver().await;

        let response = session
            .transport
            .send(PortalRequest::get(Self::authenticate_url()?), Redirects::Manual)
            .await?;

        if response.status != StatusCode::TEMPORARY_REDIRECT {
            tracing::warn!("Unexpected authenticate response: {}", response.status);
            return Ok(false);
        }

        match response.location.as_deref() {
            Some(SUCCESS_MARKER) => Ok(true),
            other => {
                tracing::warn!("Authenticate redirected to {:?}", other);
                Ok(false)
            }
        }
    }
}
