//! Lock-free store of the currently trusted ranges.

use crate::range::NetworkRange;
use arc_swap::ArcSwap;
use std::net::IpAddr;
use std::sync::Arc;

/// Immutable snapshot of trusted ranges.
///
/// Operator-supplied ranges come first, remote ranges after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedSet {
    ranges: Vec<NetworkRange>,
    operator_len: usize,
}

impl TrustedSet {
    fn new(operator: &[NetworkRange], remote: Vec<NetworkRange>) -> Self {
        let mut ranges = Vec::with_capacity(operator.len() + remote.len());
        ranges.extend_from_slice(operator);
        ranges.extend(remote);
        Self {
            ranges,
            operator_len: operator.len(),
        }
    }

    /// Check if any range contains the address.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }

    /// Operator-supplied ranges.
    pub fn operator(&self) -> &[NetworkRange] {
        &self.ranges[..self.operator_len]
    }

    /// Ranges from the last successful refresh.
    pub fn remote(&self) -> &[NetworkRange] {
        &self.ranges[self.operator_len..]
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Holds the active [`TrustedSet`] behind an atomically swapped pointer.
///
/// Readers never block and always see a complete set; `update` publishes a
/// new set with a single pointer store.
#[derive(Debug)]
pub struct RangeStore {
    current: ArcSwap<TrustedSet>,
    operator: Arc<[NetworkRange]>,
}

impl RangeStore {
    /// Create a store trusting only the operator-supplied ranges.
    pub fn new(operator: Vec<NetworkRange>) -> Self {
        let operator: Arc<[NetworkRange]> = operator.into();
        let initial = TrustedSet::new(&operator, Vec::new());
        Self {
            current: ArcSwap::from_pointee(initial),
            operator,
        }
    }

    /// Check if the address is currently trusted.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.current.load().contains(ip)
    }

    /// Replace the remote portion of the trusted set.
    pub fn update(&self, remote: Vec<NetworkRange>) {
        let next = TrustedSet::new(&self.operator, remote);
        self.current.store(Arc::new(next));
    }

    /// Current set, for diagnostics.
    pub fn snapshot(&self) -> Arc<TrustedSet> {
        self.current.load_full()
    }
}
