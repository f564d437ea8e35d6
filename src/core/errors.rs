//! Defines the primary error type for the core library.

use bytes::Bytes;
use thiserror::Error;

/// All failures that can originate from the caching and peer-coordination core.
#[derive(Error, Debug, Clone)]
pub enum CdnError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("origin unreachable: {0}")]
    OriginUnreachable(String),

    #[error("origin returned status {code}")]
    OriginStatus { code: u16, body: Bytes },

    #[error("origin IO error: {0}")]
    OriginIo(String),

    #[error("corrupt envelope: {0}")]
    CorruptEnvelope(String),

    #[error("Header type unknown: {0}")]
    UnknownType(String),

    #[error("failed to open cached file: {0}")]
    OpenFailed(String),

    #[error("control channel lost: {0}")]
    ControlLost(String),
}

impl From<std::io::Error> for CdnError {
    fn from(e: std::io::Error) -> Self {
        CdnError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for CdnError {
    fn from(e: reqwest::Error) -> Self {
        CdnError::OriginUnreachable(e.to_string())
    }
}

impl CdnError {
    /// The HTTP status this error should be reflected to the client as, if the
    /// error carries one verbatim from the origin. Otherwise `None` (caller
    /// should respond 500).
    pub fn http_status(&self) -> Option<(u16, Bytes)> {
        match self {
            CdnError::OriginStatus { code, body } => Some((*code, body.clone())),
            _ => None,
        }
    }
}
