//! Data models for portal detection and login attempts

use serde::Serialize;
use std::fmt;

/// What kind of portal (if any) intercepted the connectivity probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PortalVariant {
    /// The probe returned 204, nothing is intercepting traffic
    NotCaptive,
    /// Traffic is intercepted, but not by the ČD WiFi portal
    UnknownPortal,
    /// ČD WiFi gateway serving the old `secret` + EULA form
    LegacyForm,
    /// ČD WiFi gateway authenticating through a redirect token
    RedirectToken,
}

impl PortalVariant {
    pub fn is_provider(&self) -> bool {
        matches!(self, Self::LegacyForm | Self::RedirectToken)
    }
}

impl fmt::Display for PortalVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCaptive => write!(f, "not captive"),
            Self::UnknownPortal => write!(f, "unknown portal"),
            Self::LegacyForm => write!(f, "ČD WiFi (legacy form)"),
            Self::RedirectToken => write!(f, "ČD WiFi (redirect token)"),
        }
    }
}

/// Result of one detection run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptivePortalInfo {
    variant: PortalVariant,
    home_url: Option<String>,
}

impl CaptivePortalInfo {
    pub fn not_captive() -> Self {
        Self {
            variant: PortalVariant::NotCaptive,
            home_url: None,
        }
    }

    /// `location` is the raw redirect target and may be missing entirely.
    pub fn unknown_portal(location: Option<String>) -> Self {
        Self {
            variant: PortalVariant::UnknownPortal,
            home_url: location,
        }
    }

    pub fn legacy_form(home_url: impl Into<String>) -> Self {
        Self {
            variant: PortalVariant::LegacyForm,
            home_url: Some(home_url.into()),
        }
    }

    pub fn redirect_token(home_url: impl Into<String>) -> Self {
        Self {
            variant: PortalVariant::RedirectToken,
            home_url: Some(home_url.into()),
        }
    }

    pub fn variant(&self) -> PortalVariant {
        self.variant
    }

    pub fn home_url(&self) -> Option<&str> {
        self.home_url.as_deref()
    }
}

/// Form fields scraped from the legacy gateway page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyLoginForm {
    pub action: String,
    pub secret: String,
}

/// Why an attempt did not end with a working connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    DetectionFailed,
    NotCaptive,
    NotThisProvider,
    LoginFailed,
    Unknown,
}

impl ErrorKind {
    /// User-facing text for a finished attempt
    pub fn message(&self) -> &'static str {
        match self {
            Self::DetectionFailed => "Could not check for a captive portal",
            Self::NotCaptive => "No captive portal on this network",
            Self::NotThisProvider => "This captive portal is not ČD WiFi",
            Self::LoginFailed => "Logging in to ČD WiFi failed",
            Self::Unknown => "Unexpected error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Outcome of one detection + login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptOutcome {
    pub succeeded: bool,
    pub error_kind: Option<ErrorKind>,
    /// The failure came from a timed out request
    pub timed_out: bool,
}

impl AttemptOutcome {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            error_kind: None,
            timed_out: false,
        }
    }

    pub fn failure(kind: ErrorKind) -> Self {
        Self {
            succeeded: false,
            error_kind: Some(kind),
            timed_out: false,
        }
    }

    pub fn timeout(kind: ErrorKind) -> Self {
        Self {
            timed_out: true,
            ..Self::failure(kind)
        }
    }
}

/// How far the running attempt has got
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ProgressState {
    NotStarted,
    Detecting,
    LoggingIn,
    Done,
}

impl ProgressState {
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::Detecting => "Detecting captive portal...",
            Self::LoggingIn => "Logging in...",
            Self::NotStarted | Self::Done => "Connecting...",
        }
    }
}
