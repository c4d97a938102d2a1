//! HTML scraping for the legacy ČD WiFi login page

use crate::models::LegacyLoginForm;
use regex::Regex;
use std::sync::LazyLock;

/// Name of the hidden input carrying the per-session secret
const SECRET_FIELD: &str = "secret";

// An unterminated form runs to the end of the document.
static FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<form\b([^>]*)>(.*?)(?:</form\s*>|\z)").expect("static regex")
});

static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b([^>]*)>").expect("static regex"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("static regex")
});

/// Find the `secret` input inside a form and return the form's action
/// together with the input's current value.
///
/// Returns `None` when the page has no such form, which is also how a
/// page that is *not* the legacy login page is recognised.
pub fn find_legacy_form(html: &str) -> Option<LegacyLoginForm> {
    FORM_RE.captures_iter(html).find_map(|form| {
        let form_attrs = form.get(1).map_or("", |m| m.as_str());
        let form_body = form.get(2).map_or("", |m| m.as_str());

        let secret = INPUT_RE.captures_iter(form_body).find_map(|input| {
            let attrs = input.get(1).map_or("", |m| m.as_str());
            (attribute(attrs, "name").as_deref() == Some(SECRET_FIELD))
                .then(|| attribute(attrs, "value").unwrap_or_default())
        })?;

        Some(LegacyLoginForm {
            action: attribute(form_attrs, "action").unwrap_or_default(),
            secret,
        })
    })
}

/// Whether the page still shows the legacy login form
pub fn is_legacy_login_page(html: &str) -> bool {
    find_legacy_form(html).is_some()
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        let key = caps.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        let raw = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str());
        Some(decode_entities(raw))
    })
}

fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
