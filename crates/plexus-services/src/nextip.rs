use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::NextIpError;

/// An IPv4 address with its prefix length, e.g. `10.1.0.1/24`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AddressRange {
    address: Ipv4Addr,
    prefix: u8,
}

impl AddressRange {
    /// Parse a CIDR-qualified address.
    ///
    /// The range must leave room for at least one host, so the prefix is
    /// capped at 30.
    pub fn parse(cidr: &str) -> Result<Self, NextIpError> {
        let invalid = || NextIpError::InvalidRange(cidr.to_string());
        let (address, prefix) = cidr.trim().split_once('/').ok_or_else(invalid)?;
        let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        if prefix > 30 {
            return Err(invalid());
        }
        Ok(Self { address, prefix })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        match self.prefix {
            0 => 0,
            p => u32::MAX << (32 - u32::from(p)),
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & self.mask())
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) | !self.mask())
    }

    /// Returns `true` if `ip` is a usable host address of the range.
    pub fn contains_host(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        ip > u32::from(self.network()) && ip < u32::from(self.broadcast())
    }
}

impl FromStr for AddressRange {
    type Err = NextIpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// The lowest host address of `range` that is not in `used`.
///
/// Used entries may carry a `/prefix` suffix; entries that do not parse as an
/// address are ignored. The same inputs always give the same answer.
pub fn next_ip<I>(range: &AddressRange, used: I) -> Result<Ipv4Addr, NextIpError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let taken: HashSet<Ipv4Addr> = used
        .into_iter()
        .filter_map(|addr| {
            let addr = addr.as_ref().trim();
            let host = addr.split_once('/').map_or(addr, |(host, _)| host);
            host.parse().ok()
        })
        .collect();

    let first = u32::from(range.network()) + 1;
    let last = u32::from(range.broadcast());
    (first..last)
        .map(Ipv4Addr::from)
        .find(|ip| !taken.contains(ip))
        .ok_or_else(|| NextIpError::Exhausted(range.to_string()))
}
