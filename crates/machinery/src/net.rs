//! IP prefix helpers.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IP network in CIDR notation, such as `10.96.0.0/12`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

/// A malformed address or prefix.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("invalid CIDR address: {0}")]
pub struct ParseCidrError(pub String);

impl Cidr {
    /// A prefix; fails when `prefix` is too long for the address family.
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, ParseCidrError> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(ParseCidrError(format!("{}/{}", addr, prefix)));
        }
        Ok(Cidr { addr, prefix })
    }

    /// Address part as written.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// True for IPv4 prefixes.
    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    fn bits(&self) -> u32 {
        if self.is_ipv4() {
            32
        } else {
            128
        }
    }

    fn mask(&self) -> u128 {
        let bits = self.bits();
        if self.prefix == 0 {
            return 0;
        }
        let all = if bits == 32 { u32::MAX as u128 } else { u128::MAX };
        (all >> (bits - self.prefix as u32)) << (bits - self.prefix as u32)
    }

    /// The network address.
    pub fn network(&self) -> IpAddr {
        from_u128(to_u128(self.addr) & self.mask(), self.is_ipv4())
    }

    /// True if `ip` lies inside the prefix.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        if ip.is_ipv4() != self.is_ipv4() {
            return false;
        }
        to_u128(*ip) & self.mask() == to_u128(self.addr) & self.mask()
    }

    /// The `n`-th address of the network, `None` when out of range.
    pub fn nth(&self, n: u128) -> Option<IpAddr> {
        let host_bits = self.bits() - self.prefix as u32;
        if host_bits < 128 && n >= (1u128 << host_bits) {
            return None;
        }
        let base = to_u128(self.network());
        Some(from_u128(base.checked_add(n)?, self.is_ipv4()))
    }
}

fn to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn from_u128(value: u128, v4: bool) -> IpAddr {
    if v4 {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

impl FromStr for Cidr {
    type Err = ParseCidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCidrError(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(err)?;
        let addr: IpAddr = addr.parse().map_err(|_| err())?;
        let prefix: u8 = prefix.parse().map_err(|_| err())?;
        Cidr::new(addr, prefix).map_err(|_| err())
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Parses a comma separated list of prefixes.
pub fn split_cidrs(list: &str) -> Result<Vec<Cidr>, ParseCidrError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// The `n`-th address of the first IPv4 and the first IPv6 prefix of the
/// set, in that order.
pub fn nth_ip_in_cidr_set(cidrs: &[Cidr], n: u128) -> Result<Vec<IpAddr>, ParseCidrError> {
    let mut out = Vec::new();
    let first_v4 = cidrs.iter().find(|c| c.is_ipv4());
    let first_v6 = cidrs.iter().find(|c| !c.is_ipv4());
    for cidr in first_v4.into_iter().chain(first_v6) {
        let ip = cidr
            .nth(n)
            .ok_or_else(|| ParseCidrError(format!("{} has no address #{}", cidr, n)))?;
        out.push(ip);
    }
    Ok(out)
}

/// Parses an address that may carry a prefix length.
pub fn parse_ip_or_cidr(s: &str) -> Option<IpAddr> {
    if s.contains('/') {
        s.parse::<Cidr>().ok().map(|c| c.addr())
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tenth_service_address() {
        let cidrs = split_cidrs("10.96.0.0/12, fd00::/108").unwrap();
        let ips = nth_ip_in_cidr_set(&cidrs, 10).unwrap();
        assert_eq!(
            vec!["10.96.0.10".parse::<IpAddr>().unwrap(), "fd00::a".parse().unwrap()],
            ips
        );
    }

    #[test]
    fn containment_respects_family() {
        let net: Cidr = "192.168.0.0/16".parse().unwrap();
        assert!(net.contains(&"192.168.3.4".parse().unwrap()));
        assert!(!net.contains(&"10.0.0.1".parse().unwrap()));
        assert!(!net.contains(&"::1".parse().unwrap()));
        assert_eq!("192.168.0.0".parse::<IpAddr>().unwrap(), net.network());
    }

    #[test]
    fn bad_prefixes_fail() {
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("10.0.0.0".parse::<Cidr>().is_err());
        assert!("nope/8".parse::<Cidr>().is_err());
        assert_eq!(None, "10.0.0.0/30".parse::<Cidr>().unwrap().nth(4));
    }
}
