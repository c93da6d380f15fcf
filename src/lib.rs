//! A deadline-bounded scatter/gather byte I/O framework.
//!
//! Every operation blocks forever with no deadline, returns immediately on
//! a zero deadline, or blocks up to a bound otherwise (see
//! [`deadline::Deadline`]). The crate is organised in layers:
//!
//! - [`handle`], [`buf`], [`request`], [`io_handle`]: the native handle
//!   descriptor and the scatter/gather [`io_handle::ByteIoHandle`] contract
//!   every concrete handle implements.
//! - [`multiplexer`] (feature `os-poll`): the pluggable
//!   [`multiplexer::Multiplexer`] trait plus the synchronous fallback and
//!   platform backends (epoll, io_uring, IOCP).
//! - [`ip`], [`net`] (feature `net`): address/resolver types and kernel TCP
//!   socket handles.
//! - [`tls`] (feature `tls`): the TLS socket overlay atop `net`.
//! - [`registry`]: the process-wide socket-source directory.
//! - [`awaitable`]: the eager `Future` returned by `*_async` methods.
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod awaitable;
pub mod buf;
pub mod deadline;
mod diag;
pub mod error;
pub mod handle;
pub mod io_handle;
pub mod request;

#[cfg(feature = "os-poll")]
pub mod multiplexer;

#[cfg(feature = "net")]
pub mod ip;

#[cfg(feature = "net")]
pub mod net;

#[cfg(feature = "tls")]
pub mod tls;

pub mod registry;

pub use awaitable::Awaitable;
pub use buf::{Buffer, ConstBuffer, RegisteredBuffer};
pub use deadline::Deadline;
pub use error::{Error, Result};
pub use handle::{Caching, Disposition, Flag, Mode, NativeHandle, RawHandle};
pub use io_handle::ByteIoHandle;
pub use request::{BarrierKind, BarrierWait, IoRequest, IoResult};

#[cfg(feature = "os-poll")]
pub use multiplexer::{Multiplexer, OperationState, RegistrationToken};

#[cfg(feature = "net")]
pub use ip::{resolve, Address, Family, Resolver};

#[cfg(feature = "net")]
pub use net::{poll, ByteSocketHandle, Creation, ListeningSocketHandle, PollEntry, PollResult, PollWhat, SocketRef};

#[cfg(feature = "tls")]
pub use tls::{ListeningTlsSocketHandle, TlsAlgorithm, TlsSocketHandle};
