//! The always-available multiplexer backend: every operation is carried
//! out with ordinary blocking syscalls, with `poll(2)` (or `WSAPoll` on
//! Windows) used to emulate deadline semantics around them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::deadline::Deadline;
use crate::diag::trace_io;
use crate::error::{Error, Result};
use crate::handle::RawHandle;

use super::state::Request;
use super::{
    CompletionStats, Multiplexer, Outcome, OperationState, RegistrationResult, RegistrationToken,
};

/// See the module documentation.
pub struct SyncFallbackMultiplexer {
    next_token: AtomicU64,
    handles: Mutex<HashMap<u64, RawHandle>>,
}

impl Default for SyncFallbackMultiplexer {
    fn default() -> Self {
        SyncFallbackMultiplexer {
            next_token: AtomicU64::new(1),
            handles: Mutex::new(HashMap::new()),
        }
    }
}

impl SyncFallbackMultiplexer {
    /// Builds a fresh synchronous-fallback multiplexer.
    pub fn new() -> Self {
        trace_io!("selected synchronous fallback multiplexer backend");
        Self::default()
    }

    fn raw_for(&self, token: RegistrationToken) -> Option<RawHandle> {
        self.handles.lock().unwrap().get(&token.0).copied()
    }
}

impl Multiplexer for SyncFallbackMultiplexer {
    fn synchronised(&self) -> bool {
        // Several threads may call `check_for_any_completed_io` (or, here,
        // drive operations directly), but this backend does no kernel-side
        // completion batching of its own, so its locking is limited to the
        // handle table.
        true
    }

    unsafe fn register(&self, raw: RawHandle) -> Result<RegistrationResult> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().unwrap().insert(token, raw);
        Ok(RegistrationResult {
            token: RegistrationToken(token),
            supports_immediate_completion: false,
        })
    }

    fn deregister(&self, token: RegistrationToken) -> Result<()> {
        self.handles.lock().unwrap().remove(&token.0);
        Ok(())
    }

    fn init_io_operation(&self, token: RegistrationToken, state: &OperationState) -> Result<()> {
        state.mark_initiated();
        let raw = self
            .raw_for(token)
            .ok_or_else(|| Error::InvalidArgument("operation on a deregistered handle".into()))?;
        let request = state.take_request();
        let outcome = match request {
            Some(Request::Read { request, deadline }) => {
                Outcome::Read(run_read(raw, request, deadline))
            }
            Some(Request::Write { request, deadline }) => {
                Outcome::WriteOrBarrier(run_write(raw, request, deadline))
            }
            Some(Request::Barrier { deadline, .. }) => {
                Outcome::WriteOrBarrier(run_barrier(raw, deadline))
            }
            None => Outcome::Empty,
        };
        state.mark_completed(outcome);
        state.mark_finished();
        Ok(())
    }

    fn cancel_io_operation(&self, _token: RegistrationToken, _state: &OperationState, _deadline: Deadline) -> Result<()> {
        // Every operation above runs to completion (or failure) inside
        // `init_io_operation` itself, so by the time a caller could try to
        // cancel, the state has already finished.
        Ok(())
    }

    fn check_for_any_completed_io(&self, _deadline: Deadline, _max_completions: usize) -> Result<CompletionStats> {
        // Nothing is ever left outstanding by this backend; completions
        // happen synchronously inside `init_io_operation`.
        Ok(CompletionStats::default())
    }

    fn wake_check_for_any_completed_io(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn wait_pollable(fd: std::os::raw::c_int, writable: bool, deadline: Deadline) -> Result<()> {
    let events = if writable { libc::POLLOUT } else { libc::POLLIN };
    loop {
        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        let timeout = deadline.as_poll_millis();
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Io(err));
        }
        if rc == 0 {
            return Err(Error::TimedOut);
        }
        return Ok(());
    }
}

#[cfg(unix)]
fn run_read(
    raw: RawHandle,
    mut request: crate::request::IoRequest<crate::buf::Buffer<'static>>,
    deadline: Deadline,
) -> Result<Vec<crate::buf::Buffer<'static>>> {
    let fd = match raw {
        RawHandle::Fd(fd) => fd,
        _ => return Err(Error::NotSupported("no underlying fd".into())),
    };
    if deadline.is_zero() {
        // "try once, do not sleep": a single non-blocking attempt.
    } else {
        wait_pollable(fd, false, deadline)?;
    }
    let mut iov: Vec<libc::iovec> = request
        .buffers
        .iter_mut()
        .map(|b| libc::iovec {
            iov_base: b.as_mut_slice().as_mut_ptr().cast(),
            iov_len: b.len(),
        })
        .collect();
    if iov.len() > iov_max() {
        return Err(Error::ArgumentListTooLong {
            got: iov.len(),
            limit: iov_max(),
        });
    }
    let n = unsafe { libc::readv(fd, iov.as_mut_ptr(), iov.len() as i32) };
    if n < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Err(Error::OperationWouldBlock);
        }
        return Err(Error::Io(err));
    }
    Ok(truncate_to_bytes(request.buffers, n as usize))
}

#[cfg(unix)]
fn run_write(
    raw: RawHandle,
    request: crate::request::IoRequest<crate::buf::ConstBuffer<'static>>,
    deadline: Deadline,
) -> Result<Vec<crate::buf::ConstBuffer<'static>>> {
    let fd = match raw {
        RawHandle::Fd(fd) => fd,
        _ => return Err(Error::NotSupported("no underlying fd".into())),
    };
    if !deadline.is_zero() {
        wait_pollable(fd, true, deadline)?;
    }
    let iov: Vec<libc::iovec> = request
        .buffers
        .iter()
        .map(|b| libc::iovec {
            iov_base: b.as_slice().as_ptr() as *mut _,
            iov_len: b.len(),
        })
        .collect();
    if iov.len() > iov_max() {
        return Err(Error::ArgumentListTooLong {
            got: iov.len(),
            limit: iov_max(),
        });
    }
    let n = unsafe { libc::writev(fd, iov.as_ptr(), iov.len() as i32) };
    if n < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Err(Error::OperationWouldBlock);
        }
        return Err(Error::Io(err));
    }
    Ok(truncate_const_to_bytes(request.buffers, n as usize))
}

#[cfg(unix)]
fn run_barrier(raw: RawHandle, _deadline: Deadline) -> Result<Vec<crate::buf::ConstBuffer<'static>>> {
    // Sockets treat a barrier as a no-op; a seekable handle would call
    // fdatasync/fsync here instead, but this backend is only ever attached
    // to socket handles in this crate.
    let _ = raw;
    Ok(Vec::new())
}

#[cfg(unix)]
fn iov_max() -> usize {
    let limit = unsafe { libc::sysconf(libc::_SC_IOV_MAX) };
    if limit > 0 {
        limit as usize
    } else {
        1024
    }
}

#[cfg(unix)]
fn truncate_to_bytes(mut buffers: Vec<crate::buf::Buffer<'static>>, mut remaining: usize) -> Vec<crate::buf::Buffer<'static>> {
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

#[cfg(unix)]
fn truncate_const_to_bytes(mut buffers: Vec<crate::buf::ConstBuffer<'static>>, mut remaining: usize) -> Vec<crate::buf::ConstBuffer<'static>> {
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
fn run_read(
    _raw: RawHandle,
    _request: crate::request::IoRequest<crate::buf::Buffer<'static>>,
    _deadline: Deadline,
) -> Result<Vec<crate::buf::Buffer<'static>>> {
    Err(Error::NotSupported("synchronous fallback is POSIX-only in this build".into()))
}

#[cfg(not(unix))]
fn run_write(
    _raw: RawHandle,
    _request: crate::request::IoRequest<crate::buf::ConstBuffer<'static>>,
    _deadline: Deadline,
) -> Result<Vec<crate::buf::ConstBuffer<'static>>> {
    Err(Error::NotSupported("synchronous fallback is POSIX-only in this build".into()))
}

#[cfg(not(unix))]
fn run_barrier(_raw: RawHandle, _deadline: Deadline) -> Result<Vec<crate::buf::ConstBuffer<'static>>> {
    Ok(Vec::new())
}
