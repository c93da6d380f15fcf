//! `ListeningSocketHandle`: a bound, listening TCP socket that accepts
//! connections.

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::handle::{Caching, Disposition, Flag, Mode, NativeHandle};
use crate::ip::{Address, Family};

use super::socket::ByteSocketHandle;

/// Whether [`ListeningSocketHandle::bind`] may reuse an address still in
/// `TIME_WAIT`, or must fail if one is already bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    /// Fail with [`Error::FileExists`] if the address is already bound.
    OnlyIfNotExist,
    /// Apply `SO_REUSEADDR` before binding, so a recently-closed listener on
    /// the same address does not block the new one.
    IfNeeded,
}

/// One accepted connection: the new byte socket plus the peer's address.
pub struct Accepted {
    /// The newly connected socket. Inherits mode, caching, and flags from
    /// the listening socket that accepted it.
    pub socket: ByteSocketHandle,
    /// The address of the connecting peer.
    pub remote: Address,
}

/// A bound socket that accepts incoming TCP connections.
///
/// Not itself a [`crate::io_handle::ByteIoHandle`]: a listening socket has
/// no byte stream of its own, only a stream of accepted connections,
/// delivered through [`ListeningSocketHandle::read`].
pub struct ListeningSocketHandle {
    native: NativeHandle,
    mode: Mode,
    caching: Caching,
    flags: Flag,
    family: Family,
}

impl ListeningSocketHandle {
    /// Constructs a fresh, unbound listening socket for `family`. `mode`,
    /// `caching`, and `flags` are not applied to the listening socket
    /// itself; they are recorded and applied to each socket
    /// [`ListeningSocketHandle::read`] accepts.
    pub fn listening_socket(family: Family, mode: Mode, caching: Caching, flags: Flag) -> Result<ListeningSocketHandle> {
        let native = super::socket::create_socket_for_listener(family, flags)?;
        Ok(ListeningSocketHandle {
            native,
            mode,
            caching,
            flags,
            family,
        })
    }

    /// Binds to `address` and begins listening with the given `backlog`
    /// (`-1` uses the platform maximum). If `creation` is not
    /// [`Creation::OnlyIfNotExist`], `SO_REUSEADDR` is applied before
    /// binding.
    pub fn bind(&mut self, address: Address, creation: Creation, backlog: i32) -> Result<()> {
        if address.family() != self.family {
            return Err(Error::InvalidArgument(
                "bind address family does not match the listening socket's family".into(),
            ));
        }
        if creation != Creation::OnlyIfNotExist {
            set_reuseaddr(&self.native)?;
        }
        bind_native(&self.native, address)?;
        let backlog = if backlog < 0 { platform_max_backlog() } else { backlog };
        listen_native(&self.native, backlog)
    }

    /// Accepts one or more incoming connections into `max_connections`
    /// slots, blocking up to `deadline`. Returns fewer than requested if
    /// the deadline elapses after at least one connection, or zero if none
    /// arrived before `deadline`.
    pub fn read(&self, max_connections: usize, deadline: Deadline) -> Result<Vec<Accepted>> {
        if max_connections == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(max_connections.min(16));
        for i in 0..max_connections {
            let per_call_deadline = if i == 0 { deadline } else { Deadline::zero() };
            match accept_native(&self.native, per_call_deadline) {
                Ok((native, remote)) => {
                    let socket = ByteSocketHandle::from_accepted(native, self.mode, self.caching, self.flags, self.family);
                    out.push(Accepted { socket, remote });
                }
                Err(Error::OperationWouldBlock) | Err(Error::TimedOut) => break,
                Err(e) => {
                    if out.is_empty() {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(out)
    }

    /// The address this listener is bound to.
    pub fn local_endpoint(&self) -> Result<Address> {
        super::socket::endpoint_native(&self.native, false)
    }
}

impl Drop for ListeningSocketHandle {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(fd) = self.native.fd() {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

#[cfg(unix)]
fn set_reuseaddr(native: &NativeHandle) -> Result<()> {
    let fd = native.fd().unwrap();
    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as u32,
        )
    };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(unix)]
fn bind_native(native: &NativeHandle, address: Address) -> Result<()> {
    let fd = native.fd().unwrap();
    let (sockaddr, len) = super::socket::to_sockaddr(address)?;
    let rc = unsafe { libc::bind(fd, sockaddr.as_ptr() as *const libc::sockaddr, len) };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(unix)]
fn listen_native(native: &NativeHandle, backlog: i32) -> Result<()> {
    let fd = native.fd().unwrap();
    let rc = unsafe { libc::listen(fd, backlog) };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(unix)]
fn platform_max_backlog() -> i32 {
    // SOMAXCONN is typically small and conservative; a real deployment can
    // raise it via sysctl, but this is the portable default.
    libc::SOMAXCONN as i32
}

#[cfg(unix)]
fn accept_native(native: &NativeHandle, deadline: Deadline) -> Result<(NativeHandle, Address)> {
    let fd = native.fd().unwrap();
    let nonblocking = native.disposition().contains(Disposition::NONBLOCKING);
    if nonblocking && !deadline.is_zero() {
        wait_acceptable(fd, deadline)?;
    } else if nonblocking && deadline.is_zero() {
        if !poll_acceptable_once(fd)? {
            return Err(Error::OperationWouldBlock);
        }
    }
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    #[cfg(target_os = "linux")]
    let accepted = unsafe {
        libc::accept4(
            fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC | if nonblocking { libc::SOCK_NONBLOCK } else { 0 },
        )
    };
    #[cfg(not(target_os = "linux"))]
    let accepted = unsafe { libc::accept(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };
    if accepted < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Err(Error::OperationWouldBlock);
        }
        return Err(Error::Io(err));
    }
    #[cfg(not(target_os = "linux"))]
    if nonblocking {
        unsafe {
            let flags = libc::fcntl(accepted, libc::F_GETFL, 0);
            libc::fcntl(accepted, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
    let mut disposition = Disposition::KERNEL_HANDLE | Disposition::SOCKET | Disposition::CONNECTED;
    if nonblocking {
        disposition |= Disposition::NONBLOCKING;
    }
    let remote = super::socket::sockaddr_storage_to_address(&storage)?;
    Ok((NativeHandle::from_fd(accepted, disposition), remote))
}

#[cfg(unix)]
fn wait_acceptable(fd: std::os::raw::c_int, deadline: Deadline) -> Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, deadline.as_poll_millis()) };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    if rc == 0 {
        return Err(Error::TimedOut);
    }
    Ok(())
}

#[cfg(unix)]
fn poll_acceptable_once(fd: std::os::raw::c_int) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(rc > 0)
}

#[cfg(not(unix))]
fn platform_max_backlog() -> i32 {
    128
}

#[cfg(not(unix))]
fn set_reuseaddr(_native: &NativeHandle) -> Result<()> {
    Err(Error::NotSupported("non-Unix listening sockets are not implemented in this build".into()))
}

#[cfg(not(unix))]
fn bind_native(_native: &NativeHandle, _address: Address) -> Result<()> {
    Err(Error::NotSupported("non-Unix listening sockets are not implemented in this build".into()))
}

#[cfg(not(unix))]
fn listen_native(_native: &NativeHandle, _backlog: i32) -> Result<()> {
    Err(Error::NotSupported("non-Unix listening sockets are not implemented in this build".into()))
}

#[cfg(not(unix))]
fn accept_native(_native: &NativeHandle, _deadline: Deadline) -> Result<(NativeHandle, Address)> {
    Err(Error::NotSupported("non-Unix listening sockets are not implemented in this build".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn bind_rejects_mismatched_family() {
        let mut listener = ListeningSocketHandle::listening_socket(Family::V4, Mode::Write, Caching::All, Flag::NONE).unwrap();
        let v6_any = Address::make_v6([0; 16], 0, 0);
        assert!(listener.bind(v6_any, Creation::IfNeeded, -1).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn bind_listen_and_query_local_endpoint() {
        let mut listener = ListeningSocketHandle::listening_socket(Family::V4, Mode::Write, Caching::All, Flag::NONE).unwrap();
        let any = Address::make_v4([127, 0, 0, 1], 0);
        listener.bind(any, Creation::IfNeeded, -1).unwrap();
        let bound = listener.local_endpoint().unwrap();
        assert!(bound.port() > 0);
    }
}
