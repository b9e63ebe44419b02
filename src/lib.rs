//! CloudFront Gate Agent for Zentinel.
//!
//! Admits a request only when its origin address belongs to the published
//! CloudFront edge ranges or to an operator-supplied allowlist. Everything
//! else is answered with 403.
//!
//! # Features
//!
//! - **CloudFront Ranges** - Fetch the global and regional edge lists from AWS
//! - **Periodic Refresh** - Re-fetch on a fixed interval without blocking lookups
//! - **Fail-Open-to-Previous** - A failed refresh keeps the last good set
//! - **Allowed Ranges** - Extra addresses and CIDR ranges, IPv4 and IPv6
//! - **Fail-Closed Startup** - Refuse to start without a first successful fetch
//!
//! # Example Configuration
//!
//! ```yaml
//! refresh_interval: "24h"
//! fetch_timeout: "5s"
//!
//! allowed_ranges:
//!   - "10.0.0.0/8"
//!
//! settings:
//!   startup_failure: abort
//! ```

pub mod config;
pub mod gate;
pub mod range;
pub mod refresh;
pub mod sources;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use gate::{CloudFrontGate, Decision};
