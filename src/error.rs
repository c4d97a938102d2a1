use thiserror::Error;

/// Failures below the orchestrator: name resolution and HTTP transport.
///
/// None of these leave an attempt; the orchestrator folds them into an
/// [`ErrorKind`](crate::models::ErrorKind).
#[derive(Error, Debug)]
pub enum PortalError {
    #[error("could not resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl PortalError {
    /// Timeouts usually mean a weak signal and get the short retry delay.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Errors that do not come from the network itself.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Client(_))
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Transport {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

pub type PortalResult<T> = Result<T, PortalError>;
