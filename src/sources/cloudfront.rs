//! CloudFront edge range source.

use super::{FetchError, RangeFetcher};
use crate::range::{parse_ranges, NetworkRange};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Published list of CloudFront edge addresses.
pub const CLOUDFRONT_IP_LIST_URL: &str =
    "https://d7uri8nf7uskq.cloudfront.net/tools/list-cloudfront-ips";

const GLOBAL_LIST: &str = "CLOUDFRONT_GLOBAL_IP_LIST";
const REGIONAL_EDGE_LIST: &str = "CLOUDFRONT_REGIONAL_EDGE_IP_LIST";

/// CloudFront range list response.
///
/// ```json
/// {
///   "CLOUDFRONT_GLOBAL_IP_LIST": ["120.52.22.96/27", "205.251.249.0/24"],
///   "CLOUDFRONT_REGIONAL_EDGE_IP_LIST": ["13.113.196.64/26", "13.124.199.0/24"]
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct CloudFrontResponse {
    #[serde(rename = "CLOUDFRONT_GLOBAL_IP_LIST", default)]
    pub global: Vec<String>,

    #[serde(rename = "CLOUDFRONT_REGIONAL_EDGE_IP_LIST", default)]
    pub regional_edge: Vec<String>,
}

impl CloudFrontResponse {
    /// Decode a response body, which must be a JSON object.
    ///
    /// Missing lists default to empty; any other top-level shape is rejected.
    pub fn from_json(body: &str) -> Result<Self, FetchError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| FetchError::Decode(format!("Invalid JSON: {}", e)))?;

        if !value.is_object() {
            return Err(FetchError::Decode(
                "Invalid JSON: expected an object".to_string(),
            ));
        }

        serde_json::from_value(value)
            .map_err(|e| FetchError::Decode(format!("Invalid JSON: {}", e)))
    }

    /// Parse both lists, global ranges first.
    pub fn into_ranges(self) -> Result<Vec<NetworkRange>, FetchError> {
        let mut ranges = parse_ranges(&self.global).map_err(|source| {
            FetchError::InvalidRange {
                list: GLOBAL_LIST,
                source,
            }
        })?;
        let regional = parse_ranges(&self.regional_edge).map_err(|source| {
            FetchError::InvalidRange {
                list: REGIONAL_EDGE_LIST,
                source,
            }
        })?;
        ranges.extend(regional);
        Ok(ranges)
    }
}

/// Fetches the CloudFront edge ranges over HTTPS.
pub struct CloudFrontSource {
    endpoint: String,
    client: Client,
}

impl CloudFrontSource {
    /// Create a source for the given endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RangeFetcher for CloudFrontSource {
    async fn fetch(&self, timeout: Duration) -> Result<Vec<NetworkRange>, FetchError> {
        debug!(url = %self.endpoint, "Fetching CloudFront IP ranges");

        let response = self
            .client
            .get(&self.endpoint)
            .timeout(timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Decode(format!("Failed to read response: {}", e))
            }
        })?;

        CloudFrontResponse::from_json(&body)?.into_ranges()
    }

    fn name(&self) -> &str {
        "cloudfront"
    }
}
