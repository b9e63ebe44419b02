//! Range fetchers shared by unit tests.

use crate::range::{parse_ranges, NetworkRange};
use crate::sources::{FetchError, RangeFetcher};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays a fixed script; `None` entries fail with a 502.
///
/// Once the script runs out every fetch fails with a 503.
pub(crate) struct ScriptedFetcher {
    script: Mutex<VecDeque<Option<Vec<&'static str>>>>,
}

impl ScriptedFetcher {
    pub(crate) fn new(script: Vec<Option<Vec<&'static str>>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
        })
    }
}

#[async_trait]
impl RangeFetcher for ScriptedFetcher {
    async fn fetch(&self, _timeout: Duration) -> Result<Vec<NetworkRange>, FetchError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Some(list)) => Ok(parse_ranges(list).unwrap()),
            Some(None) => Err(FetchError::Status(502)),
            None => Err(FetchError::Status(503)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Never answers.
pub(crate) struct HangingFetcher;

#[async_trait]
impl RangeFetcher for HangingFetcher {
    async fn fetch(&self, _timeout: Duration) -> Result<Vec<NetworkRange>, FetchError> {
        std::future::pending::<Result<Vec<NetworkRange>, FetchError>>().await
    }

    fn name(&self) -> &str {
        "hanging"
    }
}
