//! The experimental Linux `io_uring` multiplexer backend, behind the
//! `io-uring` Cargo feature.
//!
//! No `io-uring` crate is used: nothing in this workspace's retrieval pack
//! vendors one, so the submission/completion ring is driven with the raw
//! `io_uring_setup(2)`/`io_uring_register(2)`/`io_uring_enter(2)` syscalls
//! via `libc::syscall`, mmapping the SQ ring, CQ ring, and SQE array at the
//! kernel-published offsets, the way mio's epoll backend reaches for raw
//! `libc::epoll_*` calls rather than a selector crate.

#![cfg(all(target_os = "linux", feature = "io-uring"))]

use std::collections::{HashMap, VecDeque};
use std::ptr;
use std::sync::atomic::{fence, Ordering};
use std::sync::Mutex;

unsafe fn atomic_load_u32(ptr: *mut u32) -> u32 {
    let v = ptr::read_volatile(ptr);
    fence(Ordering::Acquire);
    v
}

unsafe fn atomic_store_u32(ptr: *mut u32, val: u32) {
    fence(Ordering::Release);
    ptr::write_volatile(ptr, val);
}

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

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
mod sysnr {
    pub const IO_URING_SETUP: i64 = 425;
    pub const IO_URING_ENTER: i64 = 426;
    pub const IO_URING_REGISTER: i64 = 427;
}

const IORING_OFF_SQ_RING: i64 = 0;
const IORING_OFF_CQ_RING: i64 = 0x8000000;
const IORING_OFF_SQES: i64 = 0x10000000;

const IORING_SETUP_SQPOLL: u32 = 1 << 1;
const IORING_ENTER_GETEVENTS: u32 = 1 << 0;
const IORING_SQ_NEED_WAKEUP: u32 = 1 << 0;

const IORING_OP_READV: u8 = 1;
const IORING_OP_WRITEV: u8 = 2;
const IORING_OP_FSYNC: u8 = 3;

#[repr(C)]
#[derive(Default)]
struct IoSqringOffsets {
    head: u32,
    tail: u32,
    ring_mask: u32,
    ring_entries: u32,
    flags: u32,
    dropped: u32,
    array: u32,
    resv1: u32,
    resv2: u64,
}

#[repr(C)]
#[derive(Default)]
struct IoCqringOffsets {
    head: u32,
    tail: u32,
    ring_mask: u32,
    ring_entries: u32,
    overflow: u32,
    cqes: u32,
    flags: u32,
    resv1: u32,
    resv2: u64,
}

#[repr(C)]
#[derive(Default)]
struct IoUringParams {
    sq_entries: u32,
    cq_entries: u32,
    flags: u32,
    sq_thread_cpu: u32,
    sq_thread_idle: u32,
    features: u32,
    wq_fd: u32,
    resv: [u32; 3],
    sq_off: IoSqringOffsets,
    cq_off: IoCqringOffsets,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct IoUringSqe {
    opcode: u8,
    flags: u8,
    ioprio: u16,
    fd: i32,
    off: u64,
    addr: u64,
    len: u32,
    rw_flags: u32,
    user_data: u64,
    buf_index_or_pad: u64,
    pad2: [u64; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct IoUringCqe {
    user_data: u64,
    res: i32,
    flags: u32,
}

/// One submission/completion ring pair, plus its mmapped SQE array.
struct Ring {
    ring_fd: i32,
    sq_ring_ptr: *mut u8,
    sq_ring_size: usize,
    cq_ring_ptr: *mut u8,
    cq_ring_size: usize,
    sqes_ptr: *mut IoUringSqe,
    sqes_size: usize,
    sq_off: IoSqringOffsets,
    cq_off: IoCqringOffsets,
    sq_entries: u32,
    sqpoll: bool,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    fn new(entries: u32, sqpoll: bool) -> Result<Ring> {
        let mut params = IoUringParams {
            flags: if sqpoll { IORING_SETUP_SQPOLL } else { 0 },
            ..Default::default()
        };
        let ring_fd = unsafe {
            libc::syscall(sysnr::IO_URING_SETUP, entries, &mut params as *mut IoUringParams)
        };
        if ring_fd < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        let ring_fd = ring_fd as i32;

        let sq_ring_size = (params.sq_off.array as usize) + (params.sq_entries as usize) * 4;
        let cq_ring_size =
            (params.cq_off.cqes as usize) + (params.cq_entries as usize) * std::mem::size_of::<IoUringCqe>();
        let sqes_size = (params.sq_entries as usize) * std::mem::size_of::<IoUringSqe>();

        let sq_ring_ptr = mmap_ring(ring_fd, sq_ring_size, IORING_OFF_SQ_RING)?;
        let cq_ring_ptr = mmap_ring(ring_fd, cq_ring_size, IORING_OFF_CQ_RING)?;
        let sqes_ptr = mmap_ring(ring_fd, sqes_size, IORING_OFF_SQES)? as *mut IoUringSqe;

        Ok(Ring {
            ring_fd,
            sq_ring_ptr,
            sq_ring_size,
            cq_ring_ptr,
            cq_ring_size,
            sqes_ptr,
            sqes_size,
            sq_entries: params.sq_entries,
            sq_off: params.sq_off,
            cq_off: params.cq_off,
            sqpoll,
        })
    }

    unsafe fn sq_field(&self, offset: u32) -> *mut u32 {
        self.sq_ring_ptr.add(offset as usize) as *mut u32
    }

    unsafe fn cq_field(&self, offset: u32) -> *mut u32 {
        self.cq_ring_ptr.add(offset as usize) as *mut u32
    }

    /// Publishes one SQE to the tail with release ordering and, under
    /// `IORING_SETUP_SQPOLL`, wakes the kernel poll thread if it has gone
    /// to sleep. The tail bump is release-ordered so the kernel never
    /// observes a published index before the SQE contents it points at.
    unsafe fn submit(&self, sqe: IoUringSqe) -> Result<()> {
        let tail_ptr = self.sq_field(self.sq_off.tail);
        let mask = *self.sq_field(self.sq_off.ring_mask);
        let tail = (*tail_ptr) as u32;
        let index = tail & mask;
        *self.sqes_ptr.add(index as usize) = sqe;
        let array_ptr = self.sq_field(self.sq_off.array) as *mut u32;
        *array_ptr.add(index as usize) = index;
        atomic_store_u32(tail_ptr, tail.wrapping_add(1));

        let needs_enter = if self.sqpoll {
            let flags = atomic_load_u32(self.sq_field(self.sq_off.flags));
            flags & IORING_SQ_NEED_WAKEUP != 0
        } else {
            true
        };
        if needs_enter {
            // `min_complete` 0 and no `IORING_ENTER_GETEVENTS`: this call
            // only needs to publish the submission, not also wait for a
            // completion, since completions are reaped independently by
            // `check_for_any_completed_io`.
            let rc = libc::syscall(
                sysnr::IO_URING_ENTER,
                self.ring_fd,
                1u32,
                0u32,
                0u32,
                ptr::null::<libc::sigset_t>(),
                0usize,
            );
            if rc < 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
        }
        Ok(())
    }

    unsafe fn try_pop_completion(&self) -> Option<IoUringCqe> {
        let head_ptr = self.cq_field(self.cq_off.head);
        let tail = atomic_load_u32(self.cq_field(self.cq_off.tail));
        let head = atomic_load_u32(head_ptr);
        if head == tail {
            return None;
        }
        let mask = *self.cq_field(self.cq_off.ring_mask);
        let cqes_ptr = self.cq_ring_ptr.add(self.cq_off.cqes as usize) as *const IoUringCqe;
        let cqe = *cqes_ptr.add((head & mask) as usize);
        atomic_store_u32(head_ptr, head.wrapping_add(1));
        Some(cqe)
    }

    unsafe fn wait_for_completion(&self, deadline: Deadline) -> Result<IoUringCqe> {
        loop {
            if let Some(cqe) = self.try_pop_completion() {
                return Ok(cqe);
            }
            if deadline.is_expired() {
                return Err(Error::TimedOut);
            }
            let rc = libc::syscall(
                sysnr::IO_URING_ENTER,
                self.ring_fd,
                0u32,
                1u32,
                IORING_ENTER_GETEVENTS,
                ptr::null::<libc::sigset_t>(),
                0usize,
            );
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::Io(err));
            }
        }
    }
}

fn mmap_ring(fd: i32, size: usize, offset: i64) -> Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_POPULATE,
            fd,
            offset,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(ptr as *mut u8)
}

impl Drop for Ring {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.sq_ring_ptr as *mut _, self.sq_ring_size);
            libc::munmap(self.cq_ring_ptr as *mut _, self.cq_ring_size);
            libc::munmap(self.sqes_ptr as *mut _, self.sqes_size);
            libc::close(self.ring_fd);
        }
    }
}

/// The not-yet-completed parameters of one queued operation. The `iov`
/// fields start empty and are filled in only once an operation becomes the
/// head of its handle's queue and is actually submitted, since the kernel
/// keeps reading from that array until the matching CQE arrives.
enum PendingKind {
    Read {
        request: IoRequest<Buffer<'static>>,
        iov: Vec<libc::iovec>,
    },
    Write {
        request: IoRequest<ConstBuffer<'static>>,
        iov: Vec<libc::iovec>,
    },
    Barrier,
}

/// One outstanding or queued operation on a handle. `state` is a raw
/// pointer for the same reason as the epoll backend's equivalent: it must
/// outlive the `init_io_operation` call that enqueued it, which the
/// pinning invariant on [`OperationState`] already requires of the caller.
struct PendingOp {
    state: *const OperationState,
    kind: PendingKind,
}

unsafe impl Send for PendingOp {}

struct HandleEntry {
    fd: i32,
    queue: VecDeque<PendingOp>,
    /// True once the head of `queue` has actually been submitted to the
    /// ring and this handle is waiting for its CQE.
    submitted: bool,
}

/// This backend only ever multiplexes socket handles (this crate has no
/// seekable file handle type), so it drives a single ring pair and submits
/// only the head of each handle's FIFO at a time, matching the per-handle
/// ordering every other backend provides.
pub struct IoUringMultiplexer {
    ring: Ring,
    handles: Mutex<HashMap<u64, HandleEntry>>,
    next_token: std::sync::atomic::AtomicU64,
}

fn truncate_read_bufs(mut buffers: Vec<Buffer<'static>>, mut remaining: usize) -> Vec<Buffer<'static>> {
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

fn truncate_write_bufs(mut buffers: Vec<ConstBuffer<'static>>, mut remaining: usize) -> Vec<ConstBuffer<'static>> {
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

impl IoUringMultiplexer {
    /// Sets up the ring with `entries` submission-queue slots.
    pub fn new(entries: u32) -> Result<Self> {
        let multiplexer = IoUringMultiplexer {
            ring: Ring::new(entries, false)?,
            handles: Mutex::new(HashMap::new()),
            next_token: std::sync::atomic::AtomicU64::new(1),
        };
        trace_io!("selected io_uring multiplexer backend, {} entries", entries);
        Ok(multiplexer)
    }

    /// Builds the SQE for the head of `token`'s queue and submits it,
    /// marking the handle as having a submission in flight.
    fn submit_head(&self, token: u64, entry: &mut HandleEntry) -> Result<()> {
        let fd = entry.fd;
        let op = match entry.queue.front_mut() {
            Some(op) => op,
            None => return Ok(()),
        };
        let sqe = match &mut op.kind {
            PendingKind::Read { request, iov } => {
                *iov = request
                    .buffers
                    .iter_mut()
                    .map(|b| libc::iovec {
                        iov_base: b.as_mut_slice().as_mut_ptr().cast(),
                        iov_len: b.len(),
                    })
                    .collect();
                IoUringSqe {
                    opcode: IORING_OP_READV,
                    fd,
                    addr: iov.as_ptr() as u64,
                    len: iov.len() as u32,
                    user_data: token,
                    ..Default::default()
                }
            }
            PendingKind::Write { request, iov } => {
                *iov = request
                    .buffers
                    .iter()
                    .map(|b| libc::iovec {
                        iov_base: b.as_slice().as_ptr() as *mut _,
                        iov_len: b.len(),
                    })
                    .collect();
                IoUringSqe {
                    opcode: IORING_OP_WRITEV,
                    fd,
                    addr: iov.as_ptr() as u64,
                    len: iov.len() as u32,
                    user_data: token,
                    ..Default::default()
                }
            }
            PendingKind::Barrier => IoUringSqe {
                opcode: IORING_OP_FSYNC,
                fd,
                user_data: token,
                ..Default::default()
            },
        };
        unsafe { self.ring.submit(sqe) }?;
        entry.submitted = true;
        Ok(())
    }
}

impl Multiplexer for IoUringMultiplexer {
    fn synchronised(&self) -> bool {
        true
    }

    unsafe fn register(&self, raw: RawHandle) -> Result<RegistrationResult> {
        let fd = match raw {
            RawHandle::Fd(fd) => fd,
            _ => return Err(Error::NotSupported("io_uring backend requires a file descriptor".into())),
        };
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().unwrap().insert(
            token,
            HandleEntry {
                fd,
                queue: VecDeque::new(),
                submitted: false,
            },
        );
        Ok(RegistrationResult {
            token: RegistrationToken(token),
            supports_immediate_completion: false,
        })
    }

    fn deregister(&self, token: RegistrationToken) -> Result<()> {
        let entry = self.handles.lock().unwrap().remove(&token.0);
        if let Some(entry) = entry {
            for op in entry.queue.into_iter() {
                let state = unsafe { &*op.state };
                let outcome = match op.kind {
                    PendingKind::Read { .. } => Outcome::Read(Err(Error::OperationCanceled)),
                    PendingKind::Write { .. } | PendingKind::Barrier => {
                        Outcome::WriteOrBarrier(Err(Error::OperationCanceled))
                    }
                };
                state.mark_completed(outcome);
                state.mark_finished();
            }
        }
        Ok(())
    }

    fn init_io_operation(&self, token: RegistrationToken, state: &OperationState) -> Result<()> {
        state.mark_initiated();
        let request = state.take_request();
        let kind = match request {
            Some(Request::Read { request, deadline: _ }) => PendingKind::Read { request, iov: Vec::new() },
            Some(Request::Write { request, deadline: _ }) => PendingKind::Write { request, iov: Vec::new() },
            Some(Request::Barrier { .. }) => PendingKind::Barrier,
            None => {
                state.mark_completed(Outcome::Empty);
                state.mark_finished();
                return Ok(());
            }
        };
        let mut handles = self.handles.lock().unwrap();
        let entry = handles
            .get_mut(&token.0)
            .ok_or_else(|| Error::InvalidArgument("operation on a deregistered handle".into()))?;
        entry.queue.push_back(PendingOp {
            state: state as *const OperationState,
            kind,
        });
        if !entry.submitted {
            self.submit_head(token.0, entry)?;
        }
        Ok(())
    }

    fn cancel_io_operation(&self, token: RegistrationToken, state: &OperationState, _deadline: Deadline) -> Result<()> {
        let mut handles = self.handles.lock().unwrap();
        let entry = match handles.get_mut(&token.0) {
            Some(e) => e,
            None => return Ok(()),
        };
        let ptr = state as *const OperationState;
        // Only a queued (not yet submitted to the kernel) operation can be
        // cancelled; the head has already been handed to the kernel and
        // must be waited out via `check_for_any_completed_io`.
        if matches!(entry.queue.front(), Some(op) if std::ptr::eq(op.state, ptr)) {
            return Ok(());
        }
        if let Some(pos) = entry.queue.iter().position(|op| std::ptr::eq(op.state, ptr)) {
            entry.queue.remove(pos);
            drop(handles);
            let outcome = match state.lifecycle() {
                crate::multiplexer::Lifecycle::ReadInitiated => Outcome::Read(Err(Error::OperationCanceled)),
                _ => Outcome::WriteOrBarrier(Err(Error::OperationCanceled)),
            };
            state.mark_completed(outcome);
            state.mark_finished();
        }
        Ok(())
    }

    fn check_for_any_completed_io(&self, deadline: Deadline, max_completions: usize) -> Result<CompletionStats> {
        let mut stats = CompletionStats::default();
        while stats.finished < max_completions {
            let cqe = match unsafe { self.ring.wait_for_completion(deadline) } {
                Ok(cqe) => cqe,
                Err(Error::TimedOut) => break,
                Err(e) => return Err(e),
            };
            let token = cqe.user_data;
            let mut handles = self.handles.lock().unwrap();
            let entry = match handles.get_mut(&token) {
                Some(e) => e,
                None => continue,
            };
            let op = match entry.queue.pop_front() {
                Some(op) => op,
                None => continue,
            };
            entry.submitted = false;
            let has_more = !entry.queue.is_empty();
            drop(handles);

            let state = unsafe { &*op.state };
            let outcome = match op.kind {
                PendingKind::Read { request, .. } => Outcome::Read(if cqe.res < 0 {
                    Err(Error::Io(std::io::Error::from_raw_os_error(-cqe.res)))
                } else {
                    Ok(truncate_read_bufs(request.buffers, cqe.res as usize))
                }),
                PendingKind::Write { request, .. } => Outcome::WriteOrBarrier(if cqe.res < 0 {
                    Err(Error::Io(std::io::Error::from_raw_os_error(-cqe.res)))
                } else {
                    Ok(truncate_write_bufs(request.buffers, cqe.res as usize))
                }),
                PendingKind::Barrier => Outcome::WriteOrBarrier(if cqe.res < 0 {
                    Err(Error::Io(std::io::Error::from_raw_os_error(-cqe.res)))
                } else {
                    Ok(Vec::new())
                }),
            };
            state.mark_completed(outcome);
            state.mark_finished();
            stats.completed += 1;
            stats.finished += 1;

            if has_more {
                let mut handles = self.handles.lock().unwrap();
                if let Some(entry) = handles.get_mut(&token) {
                    let _ = self.submit_head(token, entry);
                }
            }
        }
        Ok(stats)
    }

    fn wake_check_for_any_completed_io(&self) -> Result<()> {
        Ok(())
    }
}
