//! The native handle descriptor and the small enums/bitflags that configure
//! how a handle behaves.

use bitflags::bitflags;

/// The raw OS resource a [`NativeHandle`] wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHandle {
    /// A POSIX file descriptor.
    Fd(std::os::raw::c_int),
    /// A Windows `HANDLE`/`SOCKET`, stored as the raw integer value.
    #[cfg(windows)]
    Win(usize),
    /// No underlying OS resource; used for pointer-indirection handles such
    /// as a TLS socket, which forwards to another handle it does not own.
    Invalid,
}

bitflags! {
    /// Disposition bits describing what kind of handle this is and what
    /// state it is in, mirroring the native handle descriptor's bitfield.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Disposition: u32 {
        /// Backed by a kernel object (as opposed to a pure userspace
        /// construct).
        const KERNEL_HANDLE = 1 << 0;
        /// Is a socket, as opposed to a file or pipe.
        const SOCKET = 1 << 1;
        /// Configured for non-blocking I/O.
        const NONBLOCKING = 1 << 2;
        /// Append-only: the request offset field is ignored, writes always
        /// land at end-of-file.
        const APPEND_ONLY = 1 << 3;
        /// Has completed a connection handshake (TCP connect or TLS
        /// handshake).
        const CONNECTED = 1 << 4;
        /// Requires aligned I/O (offset, buffer address, and length must be
        /// a multiple of the device's logical sector size).
        const ALIGNED_IO = 1 << 5;
        /// Has a multiplexer attached via `set_multiplexer`.
        const HAS_MULTIPLEXER = 1 << 6;
        /// First of two multiplexer-reserved state bits, free for a backend
        /// to use however it needs (e.g. "has an operation currently
        /// in-flight").
        const MULTIPLEXER_STATE_0 = 1 << 7;
        /// Second multiplexer-reserved state bit.
        const MULTIPLEXER_STATE_1 = 1 << 8;
        /// Is a TLS socket (plaintext-facing, backed by a ciphertext
        /// transport handle).
        const TLS_SOCKET = 1 << 9;
        /// Is a thin wrapper over another handle this one does not own
        /// (see [`crate::net::socket::SocketRef`]).
        const POINTER_INDIRECTION = 1 << 10;
    }
}

/// The OS handle/socket token plus the disposition bits describing it.
///
/// Owned by the wrapping handle; closing the wrapping handle releases the
/// OS resource (unless [`Disposition::POINTER_INDIRECTION`] is set, in
/// which case there is nothing of this handle's own to release).
#[derive(Debug, Clone, Copy)]
pub struct NativeHandle {
    raw: RawHandle,
    disposition: Disposition,
}

impl NativeHandle {
    /// Builds a descriptor from a POSIX file descriptor.
    #[cfg(unix)]
    pub fn from_fd(fd: std::os::raw::c_int, disposition: Disposition) -> Self {
        NativeHandle {
            raw: RawHandle::Fd(fd),
            disposition,
        }
    }

    /// Builds a descriptor with no underlying OS resource, for
    /// pointer-indirection handles.
    pub fn invalid(disposition: Disposition) -> Self {
        NativeHandle {
            raw: RawHandle::Invalid,
            disposition: disposition | Disposition::POINTER_INDIRECTION,
        }
    }

    /// The raw OS resource.
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// The POSIX file descriptor, if this handle wraps one.
    #[cfg(unix)]
    pub fn fd(&self) -> Option<std::os::raw::c_int> {
        match self.raw {
            RawHandle::Fd(fd) => Some(fd),
            _ => None,
        }
    }

    /// The disposition bits.
    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// Mutable access to the disposition bits, for state transitions (e.g.
    /// setting `CONNECTED` once `connect` succeeds).
    pub fn disposition_mut(&mut self) -> &mut Disposition {
        &mut self.disposition
    }

    /// True if this handle is a thin wrapper over another handle it does
    /// not own.
    pub fn is_pointer_indirection(&self) -> bool {
        self.disposition.contains(Disposition::POINTER_INDIRECTION)
    }
}

/// How a socket's read/write sides behave after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Shuts down the write side once connected; the handle is read-only.
    Read,
    /// The default: both sides remain open.
    Write,
    /// Shuts down the read side once connected; the handle is write-only,
    /// and the request offset field is ignored (always end-of-file).
    Append,
}

/// How aggressively the kernel (and, for sockets, Nagle's algorithm) may
/// buffer or coalesce I/O, ordered from least to most conservative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Caching {
    /// No caching of any kind.
    None,
    /// Only metadata is cached.
    OnlyMetadata,
    /// Only reads are cached.
    Reads,
    /// Reads and metadata are cached.
    ReadsAndMetadata,
    /// The default: reads, writes, and metadata are all cached/coalesced.
    /// Below this level, a socket disables Nagle's algorithm and sets a
    /// minimal send buffer, trading throughput for latency.
    All,
    /// Like `All`, but `close()` performs the full graceful-shutdown
    /// ceremony ([`crate::net::socket::ByteSocketHandle::shutdown_and_close`])
    /// automatically rather than abruptly resetting the connection.
    SafetyBarriers,
    /// Caching suitable for a handle whose contents will be deleted when
    /// closed; not meaningful for sockets but retained for parity with the
    /// handle hierarchy this type is shared with.
    Temporary,
}

impl Default for Caching {
    fn default() -> Self {
        Caching::All
    }
}

impl Caching {
    /// True if this level is below [`Caching::All`], the threshold at
    /// which sockets disable Nagle's algorithm.
    pub fn disables_nagle(&self) -> bool {
        *self < Caching::All
    }

    /// True if `close()` should perform the full shutdown ceremony rather
    /// than an abrupt close.
    pub fn wants_graceful_close(&self) -> bool {
        *self >= Caching::SafetyBarriers
    }
}

bitflags! {
    /// Construction-time behavioral flags, orthogonal to [`Mode`] and
    /// [`Caching`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flag: u32 {
        /// No special behavior.
        const NONE = 0;
        /// Sets the handle non-blocking and suitable for use with a
        /// multiplexer.
        const MULTIPLEXABLE = 1 << 0;
        /// Disables the TLS stack's normal registered-buffer pooling,
        /// forcing plain heap buffers (useful for tests that want
        /// deterministic allocation behavior).
        const NO_BUFFER_POOLING = 1 << 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caching_ordering_matches_nagle_threshold() {
        assert!(Caching::Reads.disables_nagle());
        assert!(!Caching::All.disables_nagle());
        assert!(!Caching::SafetyBarriers.disables_nagle());
    }

    #[test]
    fn safety_barriers_wants_graceful_close() {
        assert!(!Caching::All.wants_graceful_close());
        assert!(Caching::SafetyBarriers.wants_graceful_close());
        assert!(Caching::Temporary.wants_graceful_close());
    }

    #[test]
    fn disposition_bits_compose() {
        let d = Disposition::SOCKET | Disposition::NONBLOCKING;
        assert!(d.contains(Disposition::SOCKET));
        assert!(d.contains(Disposition::NONBLOCKING));
        assert!(!d.contains(Disposition::TLS_SOCKET));
    }
}
