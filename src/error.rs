//! Error taxonomy shared by the acquisition and download stages.

use std::path::PathBuf;

use thiserror::Error;

pub type ScoutResult<T> = Result<T, ScoutError>;

#[derive(Debug, Error)]
pub enum ScoutError {
    /// The remote service could not be reached (DNS, connect, timeout).
    #[error("{service} unreachable: {reason}")]
    Transport {
        service: &'static str,
        reason: String,
    },

    /// The remote service answered with a non-success status.
    #[error("{service} returned status {status}: {reason}")]
    Backend {
        service: &'static str,
        status: u16,
        reason: String,
    },

    #[error("could not decode {service} response: {reason}")]
    Decode {
        service: &'static str,
        reason: String,
    },

    #[error("scrape job failed: {0}")]
    BackendJob(String),

    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("could not create {}: {reason}", path.display())]
    CreateDir { path: PathBuf, reason: String },

    #[error("invalid category label {0:?}")]
    InvalidCategory(String),
}

impl ScoutError {
    /// Maps a `ureq` failure without echoing the request URL, which may carry
    /// credentials in its query string.
    pub(crate) fn from_ureq(service: &'static str, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let reason = response
                    .into_string()
                    .ok()
                    .map(|body| body.chars().take(200).collect::<String>())
                    .filter(|body| !body.trim().is_empty())
                    .unwrap_or_else(|| "no response body".to_string());
                Self::Backend {
                    service,
                    status,
                    reason,
                }
            }
            ureq::Error::Transport(transport) => {
                let reason = match transport.message() {
                    Some(message) => format!("{}: {message}", transport.kind()),
                    None => transport.kind().to_string(),
                };
                Self::Transport { service, reason }
            }
        }
    }

    pub(crate) fn decode(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            service,
            reason: err.to_string(),
        }
    }
}
