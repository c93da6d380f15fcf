//! The crate-wide error type.

use std::fmt;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error-kind taxonomy used by every fallible operation in this crate.
///
/// Syscall-layer failures are wrapped into the closest matching kind here
/// rather than leaking a bare `errno`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input, e.g. a bad address string or wrong buffer kind.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A scatter/gather list exceeded the platform's `IOV_MAX`-equivalent.
    #[error("argument list too long ({got} buffers, platform limit {limit})")]
    ArgumentListTooLong {
        /// The number of buffers the caller supplied.
        got: usize,
        /// The platform limit that was exceeded.
        limit: usize,
    },

    /// An argument fell outside its supported domain, e.g. more than 1024
    /// handles passed to `poll()`.
    #[error("argument out of domain: {0}")]
    ArgumentOutOfDomain(String),

    /// The requested feature is unavailable in this configuration, e.g. a
    /// deadline on a blocking-mode handle, or FIPS mode without a FIPS build.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A non-blocking connect or TLS handshake is still running.
    #[error("operation in progress")]
    OperationInProgress,

    /// A non-blocking read or write had no data ready.
    #[error("operation would block")]
    OperationWouldBlock,

    /// Cancellation completed successfully.
    #[error("operation canceled")]
    OperationCanceled,

    /// The deadline elapsed before the operation completed.
    #[error("timed out")]
    TimedOut,

    /// Allocation failed.
    #[error("not enough memory")]
    NotEnoughMemory,

    /// The resource is busy, e.g. changing the registered-buffer chunk size
    /// while buffers are in use.
    #[error("device or resource busy: {0}")]
    DeviceOrResourceBusy(String),

    /// A source registration key is already taken.
    #[error("file exists: {0}")]
    FileExists(String),

    /// I/O was attempted on a TLS handle before the handshake completed.
    #[error("not connected")]
    NotConnected,

    /// The TLS library's internal state cannot be recovered.
    #[error("state not recoverable: {0}")]
    StateNotRecoverable(String),

    /// A syscall failed; the original OS error is preserved.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The TLS library reported an error distinct from the underlying
    /// socket's own errors.
    #[cfg(feature = "tls")]
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}

impl Error {
    /// True if this error corresponds to the well-known POSIX `EAGAIN`/
    /// `EWOULDBLOCK` condition for a non-blocking handle.
    pub fn is_would_block(&self) -> bool {
        match self {
            Error::OperationWouldBlock => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::WouldBlock,
            _ => false,
        }
    }

    /// True if this error corresponds to a non-blocking connect/handshake
    /// still being in progress.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Error::OperationInProgress)
            || matches!(self, Error::Io(e) if e.raw_os_error() == Some(libc_in_progress()))
    }
}

#[cfg(unix)]
fn libc_in_progress() -> i32 {
    libc::EINPROGRESS
}

#[cfg(not(unix))]
fn libc_in_progress() -> i32 {
    // WSAEWOULDBLOCK is mapped to ErrorKind::WouldBlock by std, so on
    // Windows there is no distinct raw code worth matching here.
    i32::MIN
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => io,
            Error::OperationWouldBlock => std::io::ErrorKind::WouldBlock.into(),
            Error::TimedOut => std::io::ErrorKind::TimedOut.into(),
            other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        }
    }
}

/// Helper to format a one-off invalid-argument error without allocating a
/// `String` at every call site by hand.
pub(crate) fn invalid_argument(msg: impl fmt::Display) -> Error {
    Error::InvalidArgument(msg.to_string())
}
