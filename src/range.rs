//! Network range parsing and matching.

use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A contiguous block of addresses, stored in network form (host bits cleared).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkRange(IpNet);

impl NetworkRange {
    /// Build a range from an address and prefix length.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        let net = IpNet::new(addr, prefix_len).map_err(|_| ParseError::InvalidPrefix {
            input: format!("{}/{}", addr, prefix_len),
            max: max_prefix_len(&addr),
        })?;
        Ok(Self(net.trunc()))
    }

    /// Single-host range for an address (/32 or /128).
    pub fn host(addr: IpAddr) -> Self {
        Self(IpNet::from(addr))
    }

    /// Network base address.
    pub fn addr(&self) -> IpAddr {
        self.0.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// Check if an address lies within this range.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) match IPv4 ranges.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.0, ip) {
            (IpNet::V4(net), IpAddr::V6(v6)) => v6
                .to_ipv4_mapped()
                .is_some_and(|v4| net.contains(&v4)),
            (net, ip) => net.contains(ip),
        }
    }
}

impl fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetworkRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_range(s)
    }
}

/// Error parsing an address or CIDR string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input was empty.
    Empty,
    /// Base address is not a valid IPv4 or IPv6 address.
    InvalidAddress(String),
    /// Prefix length is not a number or is too long for the address family.
    InvalidPrefix { input: String, max: u8 },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty address"),
            ParseError::InvalidAddress(input) => write!(f, "invalid IP address: '{}'", input),
            ParseError::InvalidPrefix { input, max } => {
                write!(f, "invalid prefix length in '{}' (expected 0-{})", input, max)
            }
        }
    }
}

impl std::error::Error for ParseError {}

fn max_prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Parse a bare address or CIDR string into a range.
///
/// A bare address becomes a single-host range.
pub fn parse_range(text: &str) -> Result<NetworkRange, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let (addr_str, prefix_str) = match text.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (text, None),
    };

    let addr: IpAddr = addr_str
        .parse()
        .map_err(|_| ParseError::InvalidAddress(text.to_string()))?;

    match prefix_str {
        None => Ok(NetworkRange::host(addr)),
        Some(prefix) => {
            let max = max_prefix_len(&addr);
            let prefix_len = Some(prefix)
                .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|p| p.parse::<u8>().ok())
                .filter(|len| *len <= max)
                .ok_or_else(|| ParseError::InvalidPrefix {
                    input: text.to_string(),
                    max,
                })?;
            NetworkRange::new(addr, prefix_len)
        }
    }
}

/// Parse a list of ranges, failing on the first invalid entry.
pub fn parse_ranges<I, S>(entries: I) -> Result<Vec<NetworkRange>, ParseError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .map(|entry| parse_range(entry.as_ref()))
        .collect()
}
