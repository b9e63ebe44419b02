//! Sources of trusted network ranges.

pub mod cloudfront;

use crate::range::{NetworkRange, ParseError};
use async_trait::async_trait;
use std::time::Duration;

/// Error retrieving a range list.
#[derive(Debug)]
pub enum FetchError {
    /// HTTP request failed.
    Http(reqwest::Error),
    /// Timeout.
    Timeout,
    /// Non-success HTTP status.
    Status(u16),
    /// Body could not be read or decoded.
    Decode(String),
    /// A list entry is not a valid address or CIDR.
    InvalidRange {
        list: &'static str,
        source: ParseError,
    },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Http(e) => write!(f, "HTTP error: {}", e),
            FetchError::Timeout => write!(f, "Request timed out"),
            FetchError::Status(status) => write!(f, "Unexpected response status: {}", status),
            FetchError::Decode(msg) => write!(f, "Invalid response: {}", msg),
            FetchError::InvalidRange { list, source } => {
                write!(f, "Failed to parse {} entry: {}", list, source)
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Http(e) => Some(e),
            FetchError::InvalidRange { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(e)
        }
    }
}

/// Trait for authorities that publish trusted ranges.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Retrieve the full range list, aborting after `timeout`.
    ///
    /// Either every published range is returned or an error; never a subset.
    async fn fetch(&self, timeout: Duration) -> Result<Vec<NetworkRange>, FetchError>;

    /// Source name for logging.
    fn name(&self) -> &str;
}
