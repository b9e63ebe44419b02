//! CloudFront gate: admits only requests originating from trusted ranges.

use crate::config::{Config, ConfigError, RefreshConfig, Settings, StartupPolicy};
use crate::refresh::{RefreshHandle, RefreshScheduler, RefreshStats};
use crate::sources::cloudfront::CloudFrontSource;
use crate::sources::{FetchError, RangeFetcher};
use crate::store::RangeStore;
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// HTTP status returned to rejected callers.
pub const FORBIDDEN: u16 = 403;

/// Admission decision for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Pass the request to the downstream handler.
    Allow,
    /// Answer with 403 Forbidden; the downstream handler is not invoked.
    Reject,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Status code the host should answer with, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Decision::Allow => None,
            Decision::Reject => Some(FORBIDDEN),
        }
    }
}

/// Outcome of [`CloudFrontGate::handle`].
#[derive(Debug, PartialEq, Eq)]
pub enum Gated<T> {
    /// The downstream handler ran and produced this output.
    Forwarded(T),
    /// The request was rejected before reaching the handler.
    Forbidden,
}

/// Error constructing a gate.
#[derive(Debug)]
pub enum GateError {
    /// Invalid refresh interval, timeout, endpoint or allowed ranges.
    Config(ConfigError),
    /// HTTP client could not be created.
    Source(FetchError),
    /// The first fetch of the range list failed.
    InitialFetch(FetchError),
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::Config(e) => write!(f, "{}", e),
            GateError::Source(e) => write!(f, "failed to create range source: {}", e),
            GateError::InitialFetch(e) => {
                write!(f, "failed to update CloudFront IP ranges: {}", e)
            }
        }
    }
}

impl std::error::Error for GateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GateError::Config(e) => Some(e),
            GateError::Source(e) | GateError::InitialFetch(e) => Some(e),
        }
    }
}

impl From<ConfigError> for GateError {
    fn from(e: ConfigError) -> Self {
        GateError::Config(e)
    }
}

/// Request gate backed by a refreshed set of trusted ranges.
pub struct CloudFrontGate {
    store: Arc<RangeStore>,
    settings: Settings,
    refresh: RefreshHandle,
}

impl CloudFrontGate {
    /// Create a gate that fetches ranges from the configured CloudFront endpoint.
    ///
    /// Must be called within a tokio runtime; the refresh loop is spawned on it.
    pub async fn new(config: Config) -> Result<Self, GateError> {
        let refresh = config.refresh_config()?;
        let source = CloudFrontSource::new(refresh.endpoint.clone()).map_err(GateError::Source)?;
        Self::with_fetcher(refresh, config.settings, Arc::new(source)).await
    }

    /// Create a gate with a custom range source.
    pub async fn with_fetcher(
        refresh: RefreshConfig,
        settings: Settings,
        fetcher: Arc<dyn RangeFetcher>,
    ) -> Result<Self, GateError> {
        let store = Arc::new(RangeStore::new(refresh.allowed_ranges));
        let scheduler = RefreshScheduler::new(
            Arc::clone(&store),
            fetcher,
            refresh.interval,
            refresh.fetch_timeout,
        );

        if let Err(e) = scheduler.refresh_once().await {
            match settings.startup_failure {
                StartupPolicy::Abort => return Err(GateError::InitialFetch(e)),
                StartupPolicy::Continue => {
                    warn!(
                        error = %e,
                        "Initial CloudFront range fetch failed, starting with allowed ranges only"
                    );
                }
            }
        }

        let snapshot = store.snapshot();
        info!(
            allowed_ranges = snapshot.operator().len(),
            remote_ranges = snapshot.remote().len(),
            "CloudFront gate initialized"
        );

        Ok(Self {
            store,
            settings,
            refresh: scheduler.spawn(),
        })
    }

    /// Decide whether a request from `origin` (`ip:port` or bare IP) is admitted.
    pub fn decide(&self, origin: &str) -> Decision {
        let Some(ip) = extract_origin_ip(origin) else {
            if self.settings.log_blocked {
                info!(origin = %origin, "Blocking request with unparseable origin");
            }
            return Decision::Reject;
        };

        if self.store.contains(&ip) {
            if self.settings.log_allowed {
                debug!(ip = %ip, "Allowing request");
            }
            Decision::Allow
        } else {
            if self.settings.log_blocked {
                info!(ip = %ip, "Blocking request from untrusted address");
            }
            Decision::Reject
        }
    }

    /// Run `next` only if the request from `origin` is admitted.
    pub async fn handle<F, Fut, T>(&self, origin: &str, next: F) -> Gated<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.decide(origin) {
            Decision::Allow => Gated::Forwarded(next().await),
            Decision::Reject => Gated::Forbidden,
        }
    }

    pub fn store(&self) -> &Arc<RangeStore> {
        &self.store
    }

    pub fn refresh_stats(&self) -> &RefreshStats {
        self.refresh.stats()
    }

    /// Stop the refresh loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.refresh.stop().await;
        debug!("CloudFront gate shut down");
    }
}

/// Extract the caller's IP from a transport-level origin string.
///
/// Accepts `ip:port`, `[ipv6]:port`, a bare IP, or `[ipv6]`.
pub fn extract_origin_ip(origin: &str) -> Option<IpAddr> {
    let origin = origin.trim();

    if let Ok(addr) = origin.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    if let Ok(ip) = origin.parse::<IpAddr>() {
        return Some(ip);
    }

    origin
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.parse().ok())
}
