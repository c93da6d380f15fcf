//! The scatter/gather byte-I/O contract shared by every kernel handle in
//! this crate.

use std::sync::Arc;

use crate::awaitable::Awaitable;
use crate::buf::RegisteredBuffer;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::multiplexer::{Multiplexer, RegistrationToken};
use crate::request::{BarrierKind, BarrierWait, IoRequest, IoResult};
use crate::buf::{Buffer, ConstBuffer};

/// Scatter-gather read/write/barrier over a kernel resource capable of
/// byte I/O, with optional deadlines and an optional attached multiplexer.
///
/// All operations are deadline-bounded: an absent deadline blocks forever,
/// a zero deadline performs exactly one non-blocking attempt. Deadlined
/// I/O on a handle that was not opened multiplexable fails with
/// [`Error::NotSupported`].
pub trait ByteIoHandle {
    /// Upper bound on how many buffers one `read`/`write` call can move
    /// atomically. `1` if the OS lacks scatter I/O for this handle class,
    /// `0` for a fully-userspace handle with no such limit.
    fn max_buffers(&self) -> usize;

    /// Allocates a registered buffer of at least `bytes` bytes, rounding
    /// up to whatever was actually allocated (see
    /// [`RegisteredBuffer::allocate`]).
    fn allocate_registered_buffer(&self, bytes: usize) -> Result<RegisteredBuffer> {
        Ok(RegisteredBuffer::allocate(bytes))
    }

    /// Reads into `request.buffers`, transferring as much as possible
    /// before `deadline`. Returns the shorter-or-equal list of buffers
    /// actually filled, with lengths rewritten to the bytes actually
    /// moved; partial consumption is allowed only in the last returned
    /// buffer.
    fn read<'a>(&self, request: IoRequest<Buffer<'a>>, deadline: Deadline) -> Result<IoResult<Buffer<'a>>>;

    /// Writes from `request.buffers`, transferring as much as possible
    /// before `deadline`. Same shorter-or-equal contract as `read`.
    fn write<'a>(&self, request: IoRequest<ConstBuffer<'a>>, deadline: Deadline) -> Result<IoResult<ConstBuffer<'a>>>;

    /// Requests that previously-written data (and, depending on `kind`,
    /// metadata) reach storage before subsequently written data. A no-op
    /// for handle classes with nothing meaningful to flush (e.g. sockets).
    fn barrier(&self, kind: BarrierKind, wait: BarrierWait, deadline: Deadline) -> Result<()>;

    /// Deregisters from any previously attached multiplexer, then
    /// registers with `multiplexer`. Must only be called when no I/O is
    /// outstanding; fails [`Error::NotSupported`] if this handle was not
    /// opened multiplexable.
    fn set_multiplexer(&mut self, multiplexer: Arc<dyn Multiplexer>) -> Result<()>;

    /// The multiplexer currently attached, if any.
    fn multiplexer(&self) -> Option<Arc<dyn Multiplexer>>;

    /// The registration token for the attached multiplexer, if any.
    fn registration_token(&self) -> Option<RegistrationToken>;

    /// If a multiplexer is attached, deregisters first; then closes the OS
    /// handle.
    fn close(&mut self) -> Result<()>;

    /// An eager awaitable form of [`ByteIoHandle::read`]. If no
    /// multiplexer is attached, this degrades to a synchronous call and is
    /// immediately ready. Otherwise it constructs and initiates an
    /// operation state; if initiation completes synchronously, no
    /// suspension occurs.
    fn read_async<'a>(&self, request: IoRequest<Buffer<'a>>, deadline: Deadline) -> Awaitable<IoResult<Buffer<'a>>>
    where
        Self: Sized,
    {
        Awaitable::from_result(self.read(request, deadline))
    }

    /// An eager awaitable form of [`ByteIoHandle::write`].
    fn write_async<'a>(&self, request: IoRequest<ConstBuffer<'a>>, deadline: Deadline) -> Awaitable<IoResult<ConstBuffer<'a>>>
    where
        Self: Sized,
    {
        Awaitable::from_result(self.write(request, deadline))
    }

    /// An eager awaitable form of [`ByteIoHandle::barrier`].
    fn barrier_async(&self, kind: BarrierKind, wait: BarrierWait, deadline: Deadline) -> Awaitable<()>
    where
        Self: Sized,
    {
        Awaitable::from_result(self.barrier(kind, wait, deadline))
    }
}

/// Validates a scatter/gather list against the platform buffer-count
/// limit, matching the `argument_list_too_long` edge policy shared by
/// every handle's `read`/`write`.
pub(crate) fn check_buffer_count(count: usize, limit: usize) -> Result<()> {
    if count > limit {
        return Err(Error::ArgumentListTooLong { got: count, limit });
    }
    Ok(())
}

#[cfg(unix)]
pub(crate) fn platform_iov_max() -> usize {
    let limit = unsafe { libc::sysconf(libc::_SC_IOV_MAX) };
    if limit > 0 {
        limit as usize
    } else {
        1024
    }
}

#[cfg(not(unix))]
pub(crate) fn platform_iov_max() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_count_over_limit_fails() {
        assert!(check_buffer_count(5, 4).is_err());
        assert!(check_buffer_count(4, 4).is_ok());
    }
}
