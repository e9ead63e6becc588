use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by a page fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("remote render failed: {0}")]
    Remote(String),

    #[error("no page loaded")]
    NoPage,
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Timeout(_) => true,
            FetchError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Failures surfaced by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("could not decode store response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Setup problems. These abort the process before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),

    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    #[error("invalid configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Why a record was dropped instead of becoming (or staying) a tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum SkipReason {
    #[error("missing slug")]
    MissingSlug,

    #[error("missing name")]
    MissingName,

    #[error("missing url")]
    MissingUrl,

    #[error("url already claimed by {0}")]
    DuplicateUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinguishable() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!FetchError::Remote("boom".into()).is_timeout());
        assert!(!FetchError::NoPage.is_timeout());
    }

    #[test]
    fn skip_reason_display() {
        assert_eq!(
            SkipReason::DuplicateUrl("clever-ai".into()).to_string(),
            "url already claimed by clever-ai"
        );
    }
}
