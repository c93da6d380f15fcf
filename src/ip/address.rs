use std::cmp::Ordering;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::error::{invalid_argument, Error};

/// The address family of an [`Address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    /// Neither `make_v4` nor `make_v6` has been used; a default-constructed
    /// address.
    Unknown,
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

/// A version-independent IP endpoint: family, address bytes, port, and (for
/// v6) flow info and scope id.
///
/// Trivially copyable, fixed-size inline storage, no heap allocation. The
/// byte order of [`Address::to_bytes`] is always network (big-endian) order.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Address {
    family: u8,
    _reserved: [u8; 3],
    port: u16,
    addr: [u8; 16],
    flowinfo: u32,
    scope_id: u32,
    _pad: [u8; 4],
}

const FAMILY_UNKNOWN: u8 = 0;
const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

impl Default for Address {
    fn default() -> Self {
        Address {
            family: FAMILY_UNKNOWN,
            _reserved: [0; 3],
            port: 0,
            addr: [0; 16],
            flowinfo: 0,
            scope_id: 0,
            _pad: [0; 4],
        }
    }
}

impl Address {
    /// Builds a v4 address from four octets (network order) and a port
    /// (host order).
    pub fn make_v4(octets: [u8; 4], port: u16) -> Address {
        let mut addr = [0u8; 16];
        addr[..4].copy_from_slice(&octets);
        Address {
            family: FAMILY_V4,
            addr,
            port,
            ..Address::default()
        }
    }

    /// Builds a v6 address from sixteen octets (network order), a port
    /// (host order), and an optional scope id.
    pub fn make_v6(octets: [u8; 16], port: u16, scope_id: u32) -> Address {
        Address {
            family: FAMILY_V6,
            addr: octets,
            port,
            scope_id,
            ..Address::default()
        }
    }

    /// Parses `a.b.c.d:port` or `[h:h:...]:port`. The bracketed form is
    /// mandatory for IPv6 so the port can be disambiguated from the address.
    pub fn make_from_string(s: &str) -> Result<Address, Error> {
        if let Some(rest) = s.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| invalid_argument("missing ']' in bracketed IPv6 address"))?;
            let (host, tail) = rest.split_at(close);
            let tail = &tail[1..]; // drop ']'
            let port_str = tail
                .strip_prefix(':')
                .ok_or_else(|| invalid_argument("missing port after bracketed IPv6 address"))?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| invalid_argument("invalid port"))?;
            // Scope ids (`%eth0` / `%5`) are accepted and, if numeric, kept.
            let (host, scope_id) = match host.split_once('%') {
                Some((h, scope)) => (h, scope.parse::<u32>().unwrap_or(0)),
                None => (host, 0),
            };
            let v6: Ipv6Addr = host
                .parse()
                .map_err(|_| invalid_argument("invalid IPv6 address"))?;
            Ok(Address::make_v6(v6.octets(), port, scope_id))
        } else {
            let addr: SocketAddrV4 = s
                .parse()
                .map_err(|_| invalid_argument("invalid IPv4 address:port"))?;
            Ok(Address::make_v4(addr.ip().octets(), addr.port()))
        }
    }

    /// The address family.
    pub fn family(&self) -> Family {
        match self.family {
            FAMILY_V4 => Family::V4,
            FAMILY_V6 => Family::V6,
            _ => Family::Unknown,
        }
    }

    /// True if this is a v4 address. Mutually exclusive with [`is_v6`] when
    /// the family is known.
    ///
    /// [`is_v6`]: Address::is_v6
    pub fn is_v4(&self) -> bool {
        self.family == FAMILY_V4
    }

    /// True if this is a v6 address.
    pub fn is_v6(&self) -> bool {
        self.family == FAMILY_V6
    }

    /// True if this address was default-constructed (family unknown).
    pub fn is_default(&self) -> bool {
        self.family == FAMILY_UNKNOWN
    }

    /// The port, in host byte order.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The IPv6 flow info, meaningful only when [`is_v6`](Address::is_v6).
    pub fn flowinfo(&self) -> u32 {
        self.flowinfo
    }

    /// The IPv6 scope id, meaningful only when [`is_v6`](Address::is_v6).
    pub fn scope_id(&self) -> u32 {
        self.scope_id
    }

    /// The raw address bytes in network (big-endian) order: 4 bytes for v4,
    /// 16 for v6, empty for unknown.
    pub fn to_bytes(&self) -> &[u8] {
        match self.family {
            FAMILY_V4 => &self.addr[..4],
            FAMILY_V6 => &self.addr[..16],
            _ => &[],
        }
    }

    /// True if this is a loopback address (`127.0.0.0/8` or `::1`).
    pub fn is_loopback(&self) -> bool {
        match self.family() {
            Family::V4 => self.addr[0] == 127,
            Family::V6 => Ipv6Addr::from(self.addr).is_loopback(),
            Family::Unknown => false,
        }
    }

    /// True if this is a multicast address.
    pub fn is_multicast(&self) -> bool {
        match self.family() {
            Family::V4 => (self.addr[0] & 0xf0) == 0xe0,
            Family::V6 => Ipv6Addr::from(self.addr).is_multicast(),
            Family::Unknown => false,
        }
    }

    /// True if this is the "any" address (`0.0.0.0` or `::`), suitable for
    /// binding a listening socket to all interfaces.
    pub fn is_any(&self) -> bool {
        match self.family() {
            Family::V4 => self.addr[..4] == [0, 0, 0, 0],
            Family::V6 => self.addr == [0; 16],
            Family::Unknown => false,
        }
    }

    /// Converts to a [`std::net::SocketAddr`] for interop with OS socket
    /// calls.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self.family() {
            Family::V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.addr[..4]);
                Some(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(octets),
                    self.port,
                )))
            }
            Family::V6 => Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(self.addr),
                self.port,
                self.flowinfo,
                self.scope_id,
            ))),
            Family::Unknown => None,
        }
    }

    /// Builds an [`Address`] from a [`std::net::SocketAddr`].
    pub fn from_socket_addr(sa: SocketAddr) -> Address {
        match sa {
            SocketAddr::V4(v4) => Address::make_v4(v4.ip().octets(), v4.port()),
            SocketAddr::V6(v6) => {
                let mut a = Address::make_v6(v6.ip().octets(), v6.port(), v6.scope_id());
                a.flowinfo = v6.flowinfo();
                a
            }
        }
    }

    fn sort_key(&self) -> ([u8; 16], u8, u16, u32, u32) {
        (self.addr, self.family, self.port, self.flowinfo, self.scope_id)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.family == other.family
            && self.port == other.port
            && self.addr == other.addr
            && self.flowinfo == other.flowinfo
            && self.scope_id == other.scope_id
    }
}
impl Eq for Address {}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family() {
            Family::V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.addr[..4]);
                write!(f, "{}:{}", Ipv4Addr::from(octets), self.port)
            }
            Family::V6 => {
                let v6 = Ipv6Addr::from(self.addr);
                if self.scope_id != 0 {
                    write!(f, "[{}%{}]:{}", v6, self.scope_id, self.port)
                } else {
                    write!(f, "[{}]:{}", v6, self.port)
                }
            }
            Family::Unknown => write!(f, "<default>"),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ip::Address({})", self)
    }
}

const _SIZE_CHECK: () = assert!(std::mem::size_of::<Address>() >= 32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unknown_and_self_equal() {
        let a = Address::default();
        assert_eq!(a.family(), Family::Unknown);
        assert!(a.is_default());
        assert_eq!(a, a);
    }

    #[test]
    fn v4_v6_mutually_exclusive() {
        let v4 = Address::make_v4([127, 0, 0, 1], 80);
        let v6 = Address::make_v6(Ipv6Addr::LOCALHOST.octets(), 80, 0);
        assert!(v4.is_v4() && !v4.is_v6());
        assert!(v6.is_v6() && !v6.is_v4());
    }

    #[test]
    fn v4_round_trips_through_string() {
        let a = Address::make_from_string("192.0.2.10:8080").unwrap();
        let rendered = a.to_string();
        let b = Address::make_from_string(&rendered).unwrap();
        assert_eq!(a, b);
        assert_eq!(rendered, "192.0.2.10:8080");
    }

    #[test]
    fn v6_round_trips_with_compression() {
        let a = Address::make_from_string("[2001:db8::1]:443").unwrap();
        let rendered = a.to_string();
        let b = Address::make_from_string(&rendered).unwrap();
        assert_eq!(a, b);
        assert!(rendered.contains("::"));
    }

    #[test]
    fn v6_requires_brackets() {
        assert!(Address::make_from_string("::1:80").is_err() || {
            // "::1:80" parses as a full v6 literal without a port when
            // unbracketed, which is exactly why brackets are mandatory;
            // accept either outcome as "did not yield port 80".
            let a = Address::make_from_string("::1:80");
            a.map(|a| a.port() != 80).unwrap_or(true)
        });
    }

    #[test]
    fn loopback_and_any() {
        assert!(Address::make_v4([127, 0, 0, 1], 0).is_loopback());
        assert!(Address::make_v6(Ipv6Addr::LOCALHOST.octets(), 0, 0).is_loopback());
        assert!(Address::make_v4([0, 0, 0, 0], 0).is_any());
        assert!(!Address::make_v4([1, 2, 3, 4], 0).is_any());
    }

    #[test]
    fn multicast() {
        assert!(Address::make_v4([239, 1, 1, 1], 0).is_multicast());
        assert!(!Address::make_v4([10, 0, 0, 1], 0).is_multicast());
    }

    #[test]
    fn ordering_is_total() {
        let a = Address::make_v4([1, 0, 0, 0], 0);
        let b = Address::make_v4([2, 0, 0, 0], 0);
        assert!(a < b);
        assert!(b > a);
    }

    #[test]
    fn invalid_strings_rejected() {
        assert!(Address::make_from_string("not-an-address").is_err());
        assert!(Address::make_from_string("[2001:db8::1]").is_err());
    }
}
