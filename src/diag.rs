//! Diagnostic logging seams shared across the crate.
//!
//! Thin wrappers around [`log`] macros rather than bare `log::trace!` calls
//! at each site, so every diagnostic line carries the same `target`
//! (`"byte_io_core"`) regardless of which module emits it.

/// Traces a normal I/O-path event: backend selection, handle registration,
/// TLS handshake progress, registry mutation.
macro_rules! trace_io {
    ($($arg:tt)*) => {
        log::trace!(target: "byte_io_core", $($arg)*)
    };
}

/// Warns about a recoverable but noteworthy condition on the I/O path.
macro_rules! warn_io {
    ($($arg:tt)*) => {
        log::warn!(target: "byte_io_core", $($arg)*)
    };
}

pub(crate) use trace_io;
pub(crate) use warn_io;
