//! The Linux/`epoll(7)` multiplexer backend.
//!
//! The backend reached for on Linux, mirroring mio's own
//! `sys::unix::selector::epoll`: one process-wide epoll instance,
//! edge-triggered registration (`EPOLLET`), and an `eventfd` used as the
//! wakeup primitive in place of mio's self-pipe `Waker`.
//!
//! Unlike a single-shot `poll(2)` wait, `init_io_operation` here only
//! submits (registers epoll interest and files the request on its handle's
//! FIFO) and returns once `*_initiated`; the actual `readv`/`writev` and the
//! matching `*_completed`/`*_finished` transition happen later, off
//! `check_for_any_completed_io`'s `epoll_wait`, so many outstanding
//! operations across many handles are driven from whichever thread happens
//! to call it.

#![cfg(unix)]

use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::buf::{Buffer, ConstBuffer};
use crate::deadline::Deadline;
use crate::diag::trace_io;
use crate::error::{Error, Result};
use crate::handle::RawHandle;
use crate::request::IoRequest;

use super::state::Request;
use super::{
    CompletionStats, Multiplexer, Outcome, OperationState, RegistrationResult, RegistrationToken,
};

/// The not-yet-completed parameters of one queued read or write.
enum PendingKind {
    Read {
        request: IoRequest<Buffer<'static>>,
        deadline: Deadline,
    },
    Write {
        request: IoRequest<ConstBuffer<'static>>,
        deadline: Deadline,
    },
}

impl PendingKind {
    fn deadline(&self) -> Deadline {
        match self {
            PendingKind::Read { deadline, .. } => *deadline,
            PendingKind::Write { deadline, .. } => *deadline,
        }
    }
}

/// One not-yet-executed read or write, queued because it is either the
/// first outstanding operation on its handle (submitted to epoll) or
/// waiting behind one that is (per-handle FIFO ordering).
///
/// `state` is a raw pointer rather than a reference because it must
/// outlive the borrow of the `init_io_operation` call that enqueued it;
/// this relies on the same pinning invariant documented on
/// [`OperationState`] (the caller must not move or drop the state while it
/// is outstanding, i.e. until `check_for_any_completed_io` reports it
/// `*_finished`).
struct PendingOp {
    state: *const OperationState,
    kind: PendingKind,
}

unsafe impl Send for PendingOp {}

struct HandleEntry {
    fd: RawFd,
    reads: VecDeque<PendingOp>,
    writes: VecDeque<PendingOp>,
    /// The epoll interest bits currently registered for `fd`, or `0` if
    /// nothing is registered.
    interest: u32,
}

/// See the module documentation.
pub struct EpollMultiplexer {
    epoll_fd: RawFd,
    wake_fd: RawFd,
    next_token: AtomicU64,
    handles: Mutex<HashMap<u64, HandleEntry>>,
}

impl EpollMultiplexer {
    /// Creates a fresh epoll instance plus its wakeup eventfd.
    pub fn new() -> Result<Self> {
        let epoll_fd = syscall_nonneg(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        let wake_fd = syscall_nonneg(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: u64::MAX, // reserved token for the waker
        };
        syscall_nonneg(unsafe {
            libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, wake_fd, &mut ev)
        })?;
        trace_io!("selected epoll multiplexer backend, epoll_fd {}", epoll_fd);
        Ok(EpollMultiplexer {
            epoll_fd,
            wake_fd,
            next_token: AtomicU64::new(1),
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Adds, modifies, or removes this handle's epoll registration so its
    /// registered interest exactly matches "has a read queued" /
    /// "has a write queued".
    fn sync_interest(&self, entry: &mut HandleEntry, token: u64) -> Result<()> {
        let mut want = 0u32;
        if !entry.reads.is_empty() {
            want |= libc::EPOLLIN as u32 | libc::EPOLLRDHUP as u32;
        }
        if !entry.writes.is_empty() {
            want |= libc::EPOLLOUT as u32;
        }
        if want != 0 {
            want |= libc::EPOLLET as u32;
        }
        if want == entry.interest {
            return Ok(());
        }
        let mut ev = libc::epoll_event { events: want, u64: token };
        let op = if entry.interest == 0 {
            libc::EPOLL_CTL_ADD
        } else if want == 0 {
            libc::EPOLL_CTL_DEL
        } else {
            libc::EPOLL_CTL_MOD
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, op, entry.fd, &mut ev) };
        if rc < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        entry.interest = want;
        Ok(())
    }

    fn earliest_pending_deadline(&self) -> Option<Deadline> {
        let handles = self.handles.lock().unwrap();
        let mut earliest: Option<Deadline> = None;
        for entry in handles.values() {
            for op in entry.reads.iter().chain(entry.writes.iter()) {
                let d = op.kind.deadline();
                earliest = Some(match earliest {
                    Some(e) => e.min(d),
                    None => d,
                });
            }
        }
        earliest
    }

    /// Executes the head of `token`'s read (if `readable`) or write (if
    /// `!readable`) queue, now that epoll has reported the handle ready,
    /// and drives its state to `*_completed`/`*_finished`. Leaves the head
    /// in place (a spurious wake) if the syscall still reports
    /// `WouldBlock`.
    fn drain_direction(&self, token: u64, readable: bool, stats: &mut CompletionStats) {
        let (fd, mut op) = {
            let mut handles = self.handles.lock().unwrap();
            let entry = match handles.get_mut(&token) {
                Some(e) => e,
                None => return,
            };
            let queue = if readable { &mut entry.reads } else { &mut entry.writes };
            let op = match queue.pop_front() {
                Some(op) => op,
                None => return,
            };
            (entry.fd, op)
        };
        let state = unsafe { &*op.state };
        let result = match &mut op.kind {
            PendingKind::Read { request, .. } => run_read(fd, request).map(Outcome::Read),
            PendingKind::Write { request, .. } => run_write(fd, request).map(Outcome::WriteOrBarrier),
        };
        match result {
            Ok(outcome) => {
                state.mark_completed(outcome);
                state.mark_finished();
                stats.completed += 1;
                stats.finished += 1;
                self.resync_after_completion(token);
            }
            Err(Error::OperationWouldBlock) => {
                // Spurious wakeup (or a short read racing a fuller one on
                // the same fd); put it back at the head and wait for the
                // next edge-triggered event.
                let mut handles = self.handles.lock().unwrap();
                if let Some(entry) = handles.get_mut(&token) {
                    let queue = if readable { &mut entry.reads } else { &mut entry.writes };
                    queue.push_front(op);
                }
            }
            Err(e) => {
                let outcome = if readable {
                    Outcome::Read(Err(e))
                } else {
                    Outcome::WriteOrBarrier(Err(e))
                };
                state.mark_completed(outcome);
                state.mark_finished();
                stats.completed += 1;
                stats.finished += 1;
                self.resync_after_completion(token);
            }
        }
    }

    fn resync_after_completion(&self, token: u64) {
        let mut handles = self.handles.lock().unwrap();
        if let Some(entry) = handles.get_mut(&token) {
            let _ = self.sync_interest(entry, token);
        }
    }

    /// Fails (with [`Error::TimedOut`]) the head of every handle's queues
    /// whose per-operation deadline has elapsed, even if epoll never
    /// reported that handle ready.
    fn expire_timed_out(&self, stats: &mut CompletionStats) {
        let expired: Vec<(u64, *const OperationState, bool)> = {
            let handles = self.handles.lock().unwrap();
            let mut out = Vec::new();
            for (&token, entry) in handles.iter() {
                if let Some(op) = entry.reads.front() {
                    if op.kind.deadline().is_expired() {
                        out.push((token, op.state, true));
                    }
                }
                if let Some(op) = entry.writes.front() {
                    if op.kind.deadline().is_expired() {
                        out.push((token, op.state, false));
                    }
                }
            }
            out
        };
        for (token, state_ptr, readable) in expired {
            let mut handles = self.handles.lock().unwrap();
            let entry = match handles.get_mut(&token) {
                Some(e) => e,
                None => continue,
            };
            let queue = if readable { &mut entry.reads } else { &mut entry.writes };
            let still_head = matches!(queue.front(), Some(op) if std::ptr::eq(op.state, state_ptr));
            if !still_head {
                continue;
            }
            queue.pop_front();
            let _ = self.sync_interest(entry, token);
            drop(handles);
            let state = unsafe { &*state_ptr };
            let outcome = if readable {
                Outcome::Read(Err(Error::TimedOut))
            } else {
                Outcome::WriteOrBarrier(Err(Error::TimedOut))
            };
            state.mark_completed(outcome);
            state.mark_finished();
            stats.completed += 1;
            stats.finished += 1;
        }
    }

}

impl Multiplexer for EpollMultiplexer {
    fn synchronised(&self) -> bool {
        true
    }

    unsafe fn register(&self, raw: RawHandle) -> Result<RegistrationResult> {
        let fd = match raw {
            RawHandle::Fd(fd) => fd,
            _ => return Err(Error::NotSupported("epoll backend requires a file descriptor".into())),
        };
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().unwrap().insert(
            token,
            HandleEntry {
                fd,
                reads: VecDeque::new(),
                writes: VecDeque::new(),
                interest: 0,
            },
        );
        Ok(RegistrationResult {
            token: RegistrationToken(token),
            // Socket completions are only ever discovered by waiting on
            // this same epoll fd, so there is no way to skip the
            // completion path entirely.
            supports_immediate_completion: false,
        })
    }

    fn deregister(&self, token: RegistrationToken) -> Result<()> {
        let entry = self.handles.lock().unwrap().remove(&token.0);
        if let Some(entry) = entry {
            unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, entry.fd, std::ptr::null_mut());
            }
            for op in entry.reads.into_iter() {
                let state = unsafe { &*op.state };
                state.mark_completed(Outcome::Read(Err(Error::OperationCanceled)));
                state.mark_finished();
            }
            for op in entry.writes.into_iter() {
                let state = unsafe { &*op.state };
                state.mark_completed(Outcome::WriteOrBarrier(Err(Error::OperationCanceled)));
                state.mark_finished();
            }
        }
        Ok(())
    }

    fn init_io_operation(&self, token: RegistrationToken, state: &OperationState) -> Result<()> {
        state.mark_initiated();
        let request = state.take_request();
        match request {
            Some(Request::Read { request, deadline }) => {
                let mut handles = self.handles.lock().unwrap();
                let entry = handles
                    .get_mut(&token.0)
                    .ok_or_else(|| Error::InvalidArgument("operation on a deregistered handle".into()))?;
                entry.reads.push_back(PendingOp {
                    state: state as *const OperationState,
                    kind: PendingKind::Read { request, deadline },
                });
                self.sync_interest(entry, token.0)
            }
            Some(Request::Write { request, deadline }) => {
                let mut handles = self.handles.lock().unwrap();
                let entry = handles
                    .get_mut(&token.0)
                    .ok_or_else(|| Error::InvalidArgument("operation on a deregistered handle".into()))?;
                entry.writes.push_back(PendingOp {
                    state: state as *const OperationState,
                    kind: PendingKind::Write { request, deadline },
                });
                self.sync_interest(entry, token.0)
            }
            Some(Request::Barrier { .. }) => {
                // This backend only ever multiplexes socket handles, for
                // which a barrier is a no-op (matching the synchronous
                // fallback); it completes immediately rather than taking a
                // FIFO slot.
                state.mark_completed(Outcome::WriteOrBarrier(Ok(Vec::new())));
                state.mark_finished();
                Ok(())
            }
            None => {
                state.mark_completed(Outcome::Empty);
                state.mark_finished();
                Ok(())
            }
        }
    }

    fn cancel_io_operation(&self, token: RegistrationToken, state: &OperationState, _deadline: Deadline) -> Result<()> {
        let mut handles = self.handles.lock().unwrap();
        let entry = match handles.get_mut(&token.0) {
            Some(e) => e,
            None => return Ok(()),
        };
        let ptr = state as *const OperationState;
        let mut found = false;
        if let Some(pos) = entry.reads.iter().position(|op| std::ptr::eq(op.state, ptr)) {
            entry.reads.remove(pos);
            found = true;
        }
        if let Some(pos) = entry.writes.iter().position(|op| std::ptr::eq(op.state, ptr)) {
            entry.writes.remove(pos);
            found = true;
        }
        if found {
            let _ = self.sync_interest(entry, token.0);
            drop(handles);
            let lifecycle = state.lifecycle();
            let outcome = if matches!(lifecycle, crate::multiplexer::Lifecycle::ReadInitiated) {
                Outcome::Read(Err(Error::OperationCanceled))
            } else {
                Outcome::WriteOrBarrier(Err(Error::OperationCanceled))
            };
            state.mark_completed(outcome);
            state.mark_finished();
        }
        Ok(())
    }

    fn check_for_any_completed_io(&self, deadline: Deadline, max_completions: usize) -> Result<CompletionStats> {
        let mut stats = CompletionStats::default();
        if max_completions == 0 {
            return Ok(stats);
        }
        let effective_deadline = match self.earliest_pending_deadline() {
            Some(d) => deadline.min(d),
            None => deadline,
        };
        let timeout = effective_deadline.as_poll_millis();
        let mut events: [libc::epoll_event; 64] = unsafe { std::mem::zeroed() };
        let n = unsafe { libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), events.len() as i32, timeout) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(Error::Io(err));
            }
            return Ok(stats);
        }
        for event in &events[..n as usize] {
            if stats.finished >= max_completions {
                break;
            }
            if event.u64 == u64::MAX {
                let mut buf = [0u8; 8];
                unsafe {
                    libc::read(self.wake_fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
                }
                continue;
            }
            let token = event.u64;
            let readable = event.events
                & (libc::EPOLLIN as u32 | libc::EPOLLHUP as u32 | libc::EPOLLRDHUP as u32 | libc::EPOLLERR as u32)
                != 0;
            let writable = event.events & (libc::EPOLLOUT as u32 | libc::EPOLLERR as u32) != 0;
            if readable && stats.finished < max_completions {
                self.drain_direction(token, true, &mut stats);
            }
            if writable && stats.finished < max_completions {
                self.drain_direction(token, false, &mut stats);
            }
        }
        if stats.finished < max_completions {
            self.expire_timed_out(&mut stats);
        }
        Ok(stats)
    }

    fn wake_check_for_any_completed_io(&self) -> Result<()> {
        let value: u64 = 1;
        let rc = unsafe {
            libc::write(
                self.wake_fd,
                &value as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if rc < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for EpollMultiplexer {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
            libc::close(self.wake_fd);
        }
    }
}

fn syscall_nonneg(rc: RawFd) -> Result<RawFd> {
    if rc < 0 {
        Err(Error::Io(std::io::Error::last_os_error()))
    } else {
        Ok(rc)
    }
}

/// Attempts the `readv` once; the caller has already been told by epoll
/// that `fd` is readable, so `WouldBlock` here means a spurious or
/// already-drained edge-triggered wakeup. Takes `request` by reference so
/// its buffers survive a `WouldBlock` and can be retried later.
fn run_read(fd: RawFd, request: &mut IoRequest<Buffer<'static>>) -> Result<Vec<Buffer<'static>>> {
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
    let buffers = std::mem::take(&mut request.buffers);
    Ok(truncate_bufs(buffers, n as usize))
}

fn run_write(fd: RawFd, request: &IoRequest<ConstBuffer<'static>>) -> Result<Vec<ConstBuffer<'static>>> {
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
    Ok(truncate_const_bufs(request.buffers.clone(), n as usize))
}

fn truncate_bufs(mut buffers: Vec<Buffer<'static>>, mut remaining: usize) -> Vec<Buffer<'static>> {
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

fn truncate_const_bufs(mut buffers: Vec<ConstBuffer<'static>>, mut remaining: usize) -> Vec<ConstBuffer<'static>> {
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
