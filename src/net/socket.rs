//! `ByteSocketHandle`: a connected (or connecting) TCP byte stream.

use std::sync::Arc;

use crate::buf::{Buffer, ConstBuffer};
use crate::deadline::Deadline;
use crate::diag::trace_io;
use crate::error::{invalid_argument, Error, Result};
use crate::handle::{Caching, Disposition, Flag, Mode, NativeHandle, RawHandle};
use crate::io_handle::{check_buffer_count, platform_iov_max, ByteIoHandle};
use crate::ip::{Address, Family};
use crate::multiplexer::{Multiplexer, RegistrationToken};
use crate::request::{BarrierKind, BarrierWait, IoRequest, IoResult};

/// Which side(s) of a connection [`ByteSocketHandle::shutdown`] affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Shut down reads.
    Read,
    /// Shut down writes. The default.
    Write,
    /// Shut down both directions.
    Both,
}

/// Either an owned socket or a borrowed reference to one owned elsewhere.
///
/// The pointer-indirection mode a TLS socket uses: it wraps a
/// `ByteSocketHandle` it may or may not own, dispatching identically
/// either way. See [`crate::handle::Disposition::POINTER_INDIRECTION`].
pub enum SocketRef<'a> {
    /// This reference owns the socket.
    Owned(ByteSocketHandle),
    /// This reference borrows a socket owned elsewhere.
    Borrowed(&'a mut ByteSocketHandle),
}

impl<'a> std::ops::Deref for SocketRef<'a> {
    type Target = ByteSocketHandle;
    fn deref(&self) -> &ByteSocketHandle {
        match self {
            SocketRef::Owned(s) => s,
            SocketRef::Borrowed(s) => s,
        }
    }
}

impl<'a> std::ops::DerefMut for SocketRef<'a> {
    fn deref_mut(&mut self) -> &mut ByteSocketHandle {
        match self {
            SocketRef::Owned(s) => s,
            SocketRef::Borrowed(s) => s,
        }
    }
}

/// A connected, or connecting, TCP byte stream.
pub struct ByteSocketHandle {
    native: NativeHandle,
    mode: Mode,
    caching: Caching,
    flags: Flag,
    family: Family,
    multiplexer: Option<Arc<dyn Multiplexer>>,
    registration: Option<RegistrationToken>,
    connect_in_progress: Option<Address>,
}

impl ByteSocketHandle {
    /// Constructs a fresh, unconnected socket for `family`.
    ///
    /// `mode::Read` shuts down the write side once connected;
    /// `mode::Append` shuts down the read side once connected.
    /// `caching` below [`Caching::All`] disables Nagle's algorithm and
    /// sets a minimal send buffer, trading throughput for latency.
    /// [`Flag::MULTIPLEXABLE`] sets the socket non-blocking.
    pub fn byte_socket(family: Family, mode: Mode, caching: Caching, flags: Flag) -> Result<ByteSocketHandle> {
        let native = create_socket(family, flags)?;
        if caching.disables_nagle() {
            set_low_latency(&native)?;
        }
        Ok(ByteSocketHandle {
            native,
            mode,
            caching,
            flags,
            family,
            multiplexer: None,
            registration: None,
            connect_in_progress: None,
        })
    }

    /// Wraps an already-connected native handle (used by
    /// [`crate::net::listener::ListeningSocketHandle::read`] to build the
    /// accepted connection).
    pub(crate) fn from_accepted(native: NativeHandle, mode: Mode, caching: Caching, flags: Flag, family: Family) -> ByteSocketHandle {
        ByteSocketHandle {
            native,
            mode,
            caching,
            flags,
            family,
            multiplexer: None,
            registration: None,
            connect_in_progress: None,
        }
    }

    /// Restartable connect: the first non-blocking call initiates the
    /// connection; subsequent calls poll it. Returns
    /// [`Error::OperationInProgress`] while still connecting, or the
    /// terminal success/failure.
    pub fn connect(&mut self, address: Address, deadline: Deadline) -> Result<()> {
        if !self.native.disposition().contains(Disposition::NONBLOCKING) {
            return blocking_connect(&self.native, address, deadline).map(|_| self.on_connected());
        }
        match connect_nonblocking(&self.native, address, deadline, self.connect_in_progress.is_some()) {
            Ok(true) => {
                self.connect_in_progress = None;
                self.on_connected();
                Ok(())
            }
            Ok(false) => {
                self.connect_in_progress = Some(address);
                Err(Error::OperationInProgress)
            }
            Err(e) => {
                self.connect_in_progress = None;
                Err(e)
            }
        }
    }

    fn on_connected(&mut self) {
        *self.native.disposition_mut() |= Disposition::CONNECTED;
        match self.mode {
            Mode::Read => {
                let _ = self.shutdown(ShutdownKind::Write);
            }
            Mode::Append => {
                let _ = self.shutdown(ShutdownKind::Read);
            }
            Mode::Write => {}
        }
    }

    /// Shuts down one or both directions.
    pub fn shutdown(&mut self, kind: ShutdownKind) -> Result<()> {
        shutdown_native(&self.native, kind)
    }

    /// Graceful close: shuts down writes, drains reads until zero bytes,
    /// then closes. Invoked automatically by [`ByteIoHandle::close`] when
    /// this socket was opened with [`Caching::SafetyBarriers`] or above.
    pub fn shutdown_and_close(&mut self, deadline: Deadline) -> Result<()> {
        self.shutdown(ShutdownKind::Write)?;
        let mut scratch = [0u8; 4096];
        loop {
            let req = IoRequest::single(Buffer::new(&mut scratch));
            match self.read(req, deadline) {
                Ok(result) if result.buffers().iter().all(|b| b.is_empty()) => break,
                Ok(_) => continue,
                Err(Error::OperationWouldBlock) | Err(Error::TimedOut) => break,
                Err(e) => return Err(e),
            }
        }
        ByteIoHandle::close(self)
    }

    /// The address this socket is bound to locally.
    pub fn local_endpoint(&self) -> Result<Address> {
        local_endpoint_native(&self.native)
    }

    /// The peer's address, if connected.
    pub fn remote_endpoint(&self) -> Result<Address> {
        remote_endpoint_native(&self.native)
    }

    /// The address family this socket was constructed with.
    pub fn family(&self) -> Family {
        self.family
    }

    pub(crate) fn native(&self) -> &NativeHandle {
        &self.native
    }

    pub(crate) fn native_mut(&mut self) -> &mut NativeHandle {
        &mut self.native
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn caching(&self) -> Caching {
        self.caching
    }

    pub(crate) fn flags(&self) -> Flag {
        self.flags
    }
}

impl ByteIoHandle for ByteSocketHandle {
    fn max_buffers(&self) -> usize {
        platform_iov_max()
    }

    fn read<'a>(&self, request: IoRequest<Buffer<'a>>, deadline: Deadline) -> Result<IoResult<Buffer<'a>>> {
        check_buffer_count(request.buffers.len(), self.max_buffers())?;
        check_deadline_compatible(&self.native, deadline)?;
        run_readv(&self.native, request, deadline).map(IoResult::new)
    }

    fn write<'a>(&self, request: IoRequest<ConstBuffer<'a>>, deadline: Deadline) -> Result<IoResult<ConstBuffer<'a>>> {
        check_buffer_count(request.buffers.len(), self.max_buffers())?;
        check_deadline_compatible(&self.native, deadline)?;
        run_writev(&self.native, request, deadline).map(IoResult::new)
    }

    fn barrier(&self, _kind: BarrierKind, _wait: BarrierWait, _deadline: Deadline) -> Result<()> {
        // Sockets have nothing meaningful to flush; treated as a no-op per
        // the byte-I/O handle contract.
        Ok(())
    }

    fn set_multiplexer(&mut self, multiplexer: Arc<dyn Multiplexer>) -> Result<()> {
        if !self.flags.contains(Flag::MULTIPLEXABLE) {
            return Err(Error::NotSupported("handle was not opened multiplexable".into()));
        }
        if let Some(old) = self.multiplexer.take() {
            if let Some(token) = self.registration.take() {
                old.deregister(token)?;
                trace_io!("deregistered socket {:?}, token {:?}", self.native.raw(), token);
            }
        }
        let result = unsafe { multiplexer.register(self.native.raw())? };
        if result.supports_immediate_completion {
            *self.native.disposition_mut() |= Disposition::MULTIPLEXER_STATE_0;
        }
        *self.native.disposition_mut() |= Disposition::HAS_MULTIPLEXER;
        trace_io!("registered socket {:?} with multiplexer, token {:?}", self.native.raw(), result.token);
        self.registration = Some(result.token);
        self.multiplexer = Some(multiplexer);
        Ok(())
    }

    fn multiplexer(&self) -> Option<Arc<dyn Multiplexer>> {
        self.multiplexer.clone()
    }

    fn registration_token(&self) -> Option<RegistrationToken> {
        self.registration
    }

    fn close(&mut self) -> Result<()> {
        if self.caching.wants_graceful_close() && self.native.disposition().contains(Disposition::CONNECTED) {
            // `shutdown_and_close` calls back into `close`; guard against
            // recursing by clearing the caching level first.
            self.caching = Caching::All;
            return self.shutdown_and_close(Deadline::after(std::time::Duration::from_secs(5)));
        }
        if let (Some(mux), Some(token)) = (self.multiplexer.take(), self.registration.take()) {
            mux.deregister(token)?;
        }
        close_native(&mut self.native)
    }
}

impl Drop for ByteSocketHandle {
    fn drop(&mut self) {
        let _ = ByteIoHandle::close(self);
    }
}

/// Deadlined I/O requires a non-blocking (multiplexable) handle; a deadline
/// on an ordinary blocking handle has nothing to poll against.
pub(crate) fn check_deadline_compatible(native: &NativeHandle, deadline: Deadline) -> Result<()> {
    if !deadline.is_never() && !native.disposition().contains(Disposition::NONBLOCKING) {
        return Err(Error::NotSupported("deadlined I/O on a blocking-mode handle".into()));
    }
    Ok(())
}

// --- platform plumbing -----------------------------------------------------

/// Builds a listening socket's native handle. Shares the stream-socket
/// creation path since a listener is, until `listen()` is called, an
/// ordinary `SOCK_STREAM` socket.
pub(crate) fn create_socket_for_listener(family: Family, flags: Flag) -> Result<NativeHandle> {
    create_socket(family, flags)
}

#[cfg(unix)]
fn create_socket(family: Family, flags: Flag) -> Result<NativeHandle> {
    let domain = match family {
        Family::V4 => libc::AF_INET,
        Family::V6 => libc::AF_INET6,
        Family::Unknown => return Err(invalid_argument("socket family must be v4 or v6")),
    };
    let nonblocking = flags.contains(Flag::MULTIPLEXABLE);
    let mut ty = libc::SOCK_STREAM;
    #[cfg(target_os = "linux")]
    if nonblocking {
        ty |= libc::SOCK_NONBLOCK;
    }
    let fd = unsafe { libc::socket(domain, ty | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    #[cfg(not(target_os = "linux"))]
    if nonblocking {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
    let mut disposition = Disposition::KERNEL_HANDLE | Disposition::SOCKET;
    if nonblocking {
        disposition |= Disposition::NONBLOCKING;
    }
    Ok(NativeHandle::from_fd(fd, disposition))
}

#[cfg(unix)]
fn set_low_latency(native: &NativeHandle) -> Result<()> {
    let fd = native.fd().unwrap();
    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as u32,
        )
    };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    let small_sndbuf: libc::c_int = 4096;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &small_sndbuf as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as u32,
        );
    }
    Ok(())
}

#[cfg(unix)]
fn blocking_connect(native: &NativeHandle, address: Address, deadline: Deadline) -> Result<()> {
    let fd = native.fd().unwrap();
    let (sockaddr, len) = to_sockaddr(address)?;
    let rc = unsafe { libc::connect(fd, sockaddr.as_ptr() as *const libc::sockaddr, len) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINPROGRESS) {
            return wait_writable(fd, deadline).and_then(|_| check_connect_error(fd));
        }
        return Err(Error::Io(err));
    }
    Ok(())
}

#[cfg(unix)]
fn connect_nonblocking(native: &NativeHandle, address: Address, deadline: Deadline, already_started: bool) -> Result<bool> {
    let fd = native.fd().unwrap();
    if !already_started {
        let (sockaddr, len) = to_sockaddr(address)?;
        let rc = unsafe { libc::connect(fd, sockaddr.as_ptr() as *const libc::sockaddr, len) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) && err.raw_os_error() != Some(libc::EALREADY) {
            return Err(Error::Io(err));
        }
    }
    if deadline.is_zero() {
        match poll_writable_once(fd)? {
            true => check_connect_error(fd).map(|_| true),
            false => Ok(false),
        }
    } else {
        wait_writable(fd, deadline)?;
        check_connect_error(fd).map(|_| true)
    }
}

#[cfg(unix)]
fn poll_writable_once(fd: std::os::raw::c_int) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(rc > 0)
}

#[cfg(unix)]
fn wait_writable(fd: std::os::raw::c_int, deadline: Deadline) -> Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
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
fn check_connect_error(fd: std::os::raw::c_int) -> Result<()> {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    if err != 0 {
        return Err(Error::Io(std::io::Error::from_raw_os_error(err)));
    }
    Ok(())
}

#[cfg(unix)]
fn shutdown_native(native: &NativeHandle, kind: ShutdownKind) -> Result<()> {
    let fd = native.fd().unwrap();
    let how = match kind {
        ShutdownKind::Read => libc::SHUT_RD,
        ShutdownKind::Write => libc::SHUT_WR,
        ShutdownKind::Both => libc::SHUT_RDWR,
    };
    let rc = unsafe { libc::shutdown(fd, how) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        // The peer may have already closed; ENOTCONN is not actionable.
        if err.raw_os_error() != Some(libc::ENOTCONN) {
            return Err(Error::Io(err));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn close_native(native: &mut NativeHandle) -> Result<()> {
    if let Some(fd) = native.fd() {
        let rc = unsafe { libc::close(fd) };
        if rc < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn local_endpoint_native(native: &NativeHandle) -> Result<Address> {
    endpoint_native(native, false)
}

#[cfg(unix)]
fn remote_endpoint_native(native: &NativeHandle) -> Result<Address> {
    endpoint_native(native, true)
}

#[cfg(unix)]
pub(crate) fn endpoint_native(native: &NativeHandle, peer: bool) -> Result<Address> {
    let fd = native.fd().unwrap();
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let rc = if peer {
        unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) }
    } else {
        unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) }
    };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    sockaddr_storage_to_address(&storage)
}

#[cfg(unix)]
pub(crate) fn sockaddr_storage_to_address(storage: &libc::sockaddr_storage) -> Result<Address> {
    match storage.ss_family as i32 {
        libc::AF_INET => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let octets = u32::from_be(sa.sin_addr.s_addr).to_be_bytes();
            Ok(Address::make_v4(octets, u16::from_be(sa.sin_port)))
        }
        libc::AF_INET6 => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Ok(Address::make_v6(sa.sin6_addr.s6_addr, u16::from_be(sa.sin6_port), sa.sin6_scope_id))
        }
        _ => Err(invalid_argument("unsupported address family returned by the kernel")),
    }
}

#[cfg(unix)]
pub(crate) fn to_sockaddr(address: Address) -> Result<([u8; std::mem::size_of::<libc::sockaddr_in6>()], libc::socklen_t)> {
    let mut buf = [0u8; std::mem::size_of::<libc::sockaddr_in6>()];
    match address.family() {
        Family::V4 => {
            let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = address.port().to_be();
            let bytes = address.to_bytes();
            sa.sin_addr.s_addr = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_be();
            let len = std::mem::size_of::<libc::sockaddr_in>();
            unsafe {
                std::ptr::copy_nonoverlapping(&sa as *const _ as *const u8, buf.as_mut_ptr(), len);
            }
            Ok((buf, len as libc::socklen_t))
        }
        Family::V6 => {
            let mut sa: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = address.port().to_be();
            sa.sin6_flowinfo = address.flowinfo();
            sa.sin6_scope_id = address.scope_id();
            let bytes = address.to_bytes();
            sa.sin6_addr.s6_addr.copy_from_slice(bytes);
            let len = std::mem::size_of::<libc::sockaddr_in6>();
            unsafe {
                std::ptr::copy_nonoverlapping(&sa as *const _ as *const u8, buf.as_mut_ptr(), len);
            }
            Ok((buf, len as libc::socklen_t))
        }
        Family::Unknown => Err(invalid_argument("cannot connect to a default-constructed address")),
    }
}

#[cfg(unix)]
fn run_readv<'a>(native: &NativeHandle, mut request: IoRequest<Buffer<'a>>, deadline: Deadline) -> Result<Vec<Buffer<'a>>> {
    let fd = native.fd().unwrap();
    if !deadline.is_zero() && native.disposition().contains(Disposition::NONBLOCKING) {
        wait_readable(fd, deadline)?;
    }
    let mut iov: Vec<libc::iovec> = request
        .buffers
        .iter_mut()
        .map(|b| libc::iovec {
            iov_base: b.as_mut_slice().as_mut_ptr().cast(),
            iov_len: b.len(),
        })
        .collect();
    let n = unsafe { libc::readv(fd, iov.as_mut_ptr(), iov.len() as i32) };
    if n < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Err(Error::OperationWouldBlock);
        }
        return Err(Error::Io(err));
    }
    Ok(truncate_bufs(request.buffers, n as usize))
}

#[cfg(unix)]
fn wait_readable(fd: std::os::raw::c_int, deadline: Deadline) -> Result<()> {
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
fn run_writev<'a>(native: &NativeHandle, request: IoRequest<ConstBuffer<'a>>, deadline: Deadline) -> Result<Vec<ConstBuffer<'a>>> {
    let fd = native.fd().unwrap();
    if !deadline.is_zero() && native.disposition().contains(Disposition::NONBLOCKING) {
        wait_socket_writable(fd, deadline)?;
    }
    let iov: Vec<libc::iovec> = request
        .buffers
        .iter()
        .map(|b| libc::iovec {
            iov_base: b.as_slice().as_ptr() as *mut _,
            iov_len: b.len(),
        })
        .collect();
    let n = unsafe { libc::writev(fd, iov.as_ptr(), iov.len() as i32) };
    if n < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Err(Error::OperationWouldBlock);
        }
        return Err(Error::Io(err));
    }
    Ok(truncate_const_bufs(request.buffers, n as usize))
}

#[cfg(unix)]
fn wait_socket_writable(fd: std::os::raw::c_int, deadline: Deadline) -> Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
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

fn truncate_bufs<'a>(mut buffers: Vec<Buffer<'a>>, mut remaining: usize) -> Vec<Buffer<'a>> {
    let mut out = Vec::with_capacity(buffers.len());
    for buf in buffers.drain(..) {
        if remaining == 0 {
            break;
        }
        if buf.len() <= remaining {
            remaining -= buf.len();
            out.push(buf);
        } else {
            out.push(buf.truncated_to(remaining));
            remaining = 0;
        }
    }
    out
}

fn truncate_const_bufs<'a>(mut buffers: Vec<ConstBuffer<'a>>, mut remaining: usize) -> Vec<ConstBuffer<'a>> {
    let mut out = Vec::with_capacity(buffers.len());
    for buf in buffers.drain(..) {
        if remaining == 0 {
            break;
        }
        if buf.len() <= remaining {
            remaining -= buf.len();
            out.push(buf);
        } else {
            out.push(buf.truncated_to(remaining));
            remaining = 0;
        }
    }
    out
}

#[cfg(not(unix))]
fn create_socket(_family: Family, _flags: Flag) -> Result<NativeHandle> {
    Err(Error::NotSupported("non-Unix socket creation is not implemented in this build".into()))
}

#[cfg(not(unix))]
fn blocking_connect(_native: &NativeHandle, _address: Address, _deadline: Deadline) -> Result<()> {
    Err(Error::NotSupported("non-Unix connect is not implemented in this build".into()))
}

#[cfg(not(unix))]
fn connect_nonblocking(_native: &NativeHandle, _address: Address, _deadline: Deadline, _already_started: bool) -> Result<bool> {
    Err(Error::NotSupported("non-Unix connect is not implemented in this build".into()))
}

#[cfg(not(unix))]
fn shutdown_native(_native: &NativeHandle, _kind: ShutdownKind) -> Result<()> {
    Err(Error::NotSupported("non-Unix shutdown is not implemented in this build".into()))
}

#[cfg(not(unix))]
fn close_native(_native: &mut NativeHandle) -> Result<()> {
    Err(Error::NotSupported("non-Unix close is not implemented in this build".into()))
}

#[cfg(not(unix))]
pub(crate) fn local_endpoint_native(_native: &NativeHandle) -> Result<Address> {
    Err(Error::NotSupported("non-Unix endpoint queries are not implemented in this build".into()))
}

#[cfg(not(unix))]
pub(crate) fn remote_endpoint_native(_native: &NativeHandle) -> Result<Address> {
    Err(Error::NotSupported("non-Unix endpoint queries are not implemented in this build".into()))
}

#[cfg(not(unix))]
pub(crate) fn endpoint_native(_native: &NativeHandle, _peer: bool) -> Result<Address> {
    Err(Error::NotSupported("non-Unix endpoint queries are not implemented in this build".into()))
}

#[cfg(not(unix))]
fn run_readv<'a>(_native: &NativeHandle, _request: IoRequest<Buffer<'a>>, _deadline: Deadline) -> Result<Vec<Buffer<'a>>> {
    Err(Error::NotSupported("non-Unix socket I/O is not implemented in this build".into()))
}

#[cfg(not(unix))]
fn run_writev<'a>(_native: &NativeHandle, _request: IoRequest<ConstBuffer<'a>>, _deadline: Deadline) -> Result<Vec<ConstBuffer<'a>>> {
    Err(Error::NotSupported("non-Unix socket I/O is not implemented in this build".into()))
}


pub(crate) fn native_handle_for_raw(raw: RawHandle, disposition: Disposition) -> NativeHandle {
    #[cfg(unix)]
    {
        match raw {
            RawHandle::Fd(fd) => NativeHandle::from_fd(fd, disposition),
            _ => NativeHandle::invalid(disposition),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = raw;
        NativeHandle::invalid(disposition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn connect_to_closed_port_fails_quickly() {
        let mut socket = ByteSocketHandle::byte_socket(Family::V4, Mode::Write, Caching::All, Flag::NONE).unwrap();
        let target = Address::make_v4([127, 0, 0, 1], 1); // port 1 is reserved/unlikely to be listening
        let result = socket.connect(target, Deadline::after(std::time::Duration::from_millis(200)));
        assert!(result.is_err());
    }
}
