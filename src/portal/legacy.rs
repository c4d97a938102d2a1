//! Legacy ČD WiFi gateway: a form with a hidden `secret` and an EULA checkbox

use super::{LoginStrategy, PortalSession};
use crate::error::{PortalError, PortalResult};
use crate::http::{parse_url, PortalRequest, Redirects};
use crate::models::CaptivePortalInfo;
use crate::parser;
use async_trait::async_trait;

pub struct LegacyFormLogin;

#[async_trait]
impl LoginStrategy for LegacyFormLogin {
    fn name(&self) -> &'static str {
        "legacy form"
    }

    async fn login(&self, session: &PortalSession, info: &CaptivePortalInfo) -> PortalResult<bool> {
        session.refresh_nameserver().await;

        let home = info.home_url().unwrap_or_default();
        let home_url = parse_url(home)?;

        let gateway = session
            .transport
            .send(PortalRequest::get(home_url.clone()), Redirects::Follow)
            .await?;
        if !gateway.is_success() {
            tracing::warn!("Failed to fetch gateway page ({})", gateway.status);
            return Ok(false);
        }

        let Some(form) = parser::find_legacy_form(&gateway.body) else {
            tracing::warn!("Could not find the login secret on the gateway page");
            return Ok(false);
        };
        tracing::debug!("Legacy form action={}, secret={}", form.action, form.secret);

        let action_url = home_url
            .join(&form.action)
            .map_err(|source| PortalError::InvalidUrl {
                url: form.action.clone(),
                source,
            })?;

        let response = session
            .transport
            .send(
                PortalRequest::post_form(
                    action_url.clone(),
                    &[("secret", form.secret.as_str()), ("eula", "on")],
                ),
                Redirects::Follow,
            )
            .await?;
        if !response.is_success() {
            tracing::warn!("Login POST to {} failed ({})", action_url, response.status);
            return Ok(false);
        }

        if parser::is_legacy_login_page(&response.body) {
            tracing::warn!("Still on the login page after submitting the form");
            return Ok(false);
        }

        Ok(true)
    }
}
