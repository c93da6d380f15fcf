//! Name resolution (`getaddrinfo`-style), producing [`Address`] values.

use std::ffi::{CStr, CString};
use std::ptr;

use bitflags::bitflags;

use crate::deadline::Deadline;
use crate::error::{invalid_argument, Error, Result};

use super::address::{Address, Family};

bitflags! {
    /// Hints narrowing what [`resolve`] looks up, mirroring the AI_* flags
    /// passed to `getaddrinfo(3)`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResolveFlag: u32 {
        /// No hints; resolve whatever the name and service map to.
        const NONE = 0;
        /// The result will be used with a listening socket (`AI_PASSIVE`):
        /// an empty name resolves to the wildcard address.
        const PASSIVE = 1 << 0;
        /// Force the call to actually perform resolution even if the
        /// platform resolver caches results; present for parity with the
        /// reference implementation, currently a no-op on every backend.
        const BLOCKING = 1 << 1;
    }
}

/// A pending or completed name resolution.
///
/// Constructed by [`resolve`]. On every backend this crate supports, the
/// lookup is performed synchronously inside `resolve()` itself, so a
/// freshly-returned `Resolver` is always complete; `incomplete()` exists for
/// parity with a layered design where a multiplexer-aware resolver could
/// complete the lookup on a worker thread instead.
pub struct Resolver {
    name: String,
    service: String,
    addresses: Vec<Address>,
}

impl Resolver {
    /// The name that was resolved (may be empty for a passive/wildcard
    /// lookup).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The service (port or service name) that was resolved.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// True if the lookup has not yet produced a result. Always `false` for
    /// this crate's synchronous resolver.
    pub fn incomplete(&self) -> bool {
        false
    }

    /// Blocks until the lookup completes (a no-op here) and returns the
    /// resolved addresses.
    pub fn get(&self) -> &[Address] {
        &self.addresses
    }

    /// Equivalent to `get()` but respects a deadline; since resolution is
    /// already complete by construction, this never actually waits.
    pub fn wait(&self, _deadline: Deadline) -> Result<&[Address]> {
        Ok(&self.addresses)
    }
}

/// Resolves `name` and `service` to a set of addresses.
///
/// `family` restricts the lookup to [`Family::V4`] or [`Family::V6`]; pass
/// [`Family::Unknown`] to accept both. An empty `name` combined with
/// [`ResolveFlag::PASSIVE`] resolves to the wildcard address, suitable for a
/// listening socket bound to all interfaces.
pub fn resolve(
    name: &str,
    service: &str,
    family: Family,
    deadline: Deadline,
    flags: ResolveFlag,
) -> Result<Resolver> {
    // A literal dotted-quad or bracketed IPv6 address needs no resolver at
    // all; try that first since it is exact, needs no syscall, and is the
    // only case a zero deadline ("try once, do not sleep") can honour for a
    // non-passive lookup.
    if let Some(addr) = try_parse_literal(name, service) {
        return Ok(Resolver {
            name: name.to_string(),
            service: service.to_string(),
            addresses: vec![addr],
        });
    }

    if deadline.is_zero() {
        return Err(Error::TimedOut);
    }

    if name.is_empty() && flags.contains(ResolveFlag::PASSIVE) {
        let port: u16 = service.parse().unwrap_or(0);
        let addr = match family {
            Family::V6 => Address::make_v6([0; 16], port, 0),
            _ => Address::make_v4([0, 0, 0, 0], port),
        };
        return Ok(Resolver {
            name: name.to_string(),
            service: service.to_string(),
            addresses: vec![addr],
        });
    }

    let addresses = platform_resolve(name, service, family, flags)?;
    if addresses.is_empty() {
        return Err(invalid_argument(format!(
            "no addresses found for '{name}:{service}'"
        )));
    }
    Ok(Resolver {
        name: name.to_string(),
        service: service.to_string(),
        addresses,
    })
}

fn try_parse_literal(name: &str, service: &str) -> Option<Address> {
    let port: u16 = service.parse().ok()?;
    if let Ok(octets) = name.parse::<std::net::Ipv4Addr>() {
        return Some(Address::make_v4(octets.octets(), port));
    }
    if let Ok(v6) = name.parse::<std::net::Ipv6Addr>() {
        return Some(Address::make_v6(v6.octets(), port, 0));
    }
    None
}

#[cfg(unix)]
fn platform_resolve(
    name: &str,
    service: &str,
    family: Family,
    flags: ResolveFlag,
) -> Result<Vec<Address>> {
    let cname = CString::new(name).map_err(|_| invalid_argument("name contains a NUL byte"))?;
    let cservice =
        CString::new(service).map_err(|_| invalid_argument("service contains a NUL byte"))?;

    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_family = match family {
        Family::V4 => libc::AF_INET,
        Family::V6 => libc::AF_INET6,
        Family::Unknown => libc::AF_UNSPEC,
    };
    if flags.contains(ResolveFlag::PASSIVE) {
        hints.ai_flags |= libc::AI_PASSIVE;
    }

    let name_ptr = if name.is_empty() {
        ptr::null()
    } else {
        cname.as_ptr()
    };

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    let rc = unsafe { libc::getaddrinfo(name_ptr, cservice.as_ptr(), &hints, &mut res) };
    if rc != 0 {
        let msg = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) }
            .to_string_lossy()
            .into_owned();
        return Err(invalid_argument(format!("getaddrinfo failed: {msg}")));
    }

    let mut out = Vec::new();
    let mut cur = res;
    while !cur.is_null() {
        let info = unsafe { &*cur };
        match info.ai_family {
            libc::AF_INET => {
                let sa = unsafe { &*(info.ai_addr as *const libc::sockaddr_in) };
                let octets = u32::from_be(sa.sin_addr.s_addr).to_be_bytes();
                out.push(Address::make_v4(octets, u16::from_be(sa.sin_port)));
            }
            libc::AF_INET6 => {
                let sa = unsafe { &*(info.ai_addr as *const libc::sockaddr_in6) };
                out.push(Address::make_v6(
                    sa.sin6_addr.s6_addr,
                    u16::from_be(sa.sin6_port),
                    sa.sin6_scope_id,
                ));
            }
            _ => {}
        }
        cur = info.ai_next;
    }
    unsafe { libc::freeaddrinfo(res) };
    Ok(out)
}

#[cfg(not(unix))]
fn platform_resolve(
    name: &str,
    service: &str,
    _family: Family,
    _flags: ResolveFlag,
) -> Result<Vec<Address>> {
    // Non-Unix platforms resolve through `std::net::ToSocketAddrs`, which
    // loses the distinction between AI_PASSIVE and a concrete lookup but is
    // otherwise equivalent for the addresses this crate hands back.
    use std::net::ToSocketAddrs;
    let port: u16 = service
        .parse()
        .map_err(|_| invalid_argument("service must be numeric on this platform"))?;
    let addrs = (name, port)
        .to_socket_addrs()
        .map_err(|e| invalid_argument(format!("resolution failed: {e}")))?;
    Ok(addrs.map(Address::from_socket_addr).collect())
}

/// Drops any cached resolver state. The resolver in this crate holds no
/// cache of its own, so this is a no-op kept for API parity with
/// multiplexer-aware resolvers that do cache.
pub fn resolve_trim_cache() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_literal_v4() {
        let r = resolve("127.0.0.1", "8080", Family::Unknown, Deadline::never(), ResolveFlag::NONE).unwrap();
        assert_eq!(r.get().len(), 1);
        assert!(r.get()[0].is_loopback());
        assert_eq!(r.get()[0].port(), 8080);
    }

    #[test]
    fn resolves_literal_v6() {
        let r = resolve("::1", "443", Family::Unknown, Deadline::never(), ResolveFlag::NONE).unwrap();
        assert_eq!(r.get().len(), 1);
        assert!(r.get()[0].is_v6());
    }

    #[test]
    fn passive_empty_name_is_wildcard() {
        let r = resolve("", "9000", Family::V4, Deadline::never(), ResolveFlag::PASSIVE).unwrap();
        assert_eq!(r.get().len(), 1);
        assert!(r.get()[0].is_any());
        assert_eq!(r.get()[0].port(), 9000);
    }

    #[test]
    fn incomplete_is_always_false() {
        let r = resolve("127.0.0.1", "80", Family::Unknown, Deadline::never(), ResolveFlag::NONE).unwrap();
        assert!(!r.incomplete());
    }
}
