//! The free-standing `poll()` query, for callers that want a one-shot
//! readiness check across a batch of handles without a multiplexer.

use bitflags::bitflags;

use crate::deadline::Deadline;
use crate::error::Error;
use crate::error::Result;
use crate::handle::{Disposition, NativeHandle};

bitflags! {
    /// Which readiness conditions [`poll`] should report for each handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollWhat: u32 {
        /// The handle has data ready to read (or, for a listener, a
        /// connection ready to accept).
        const READABLE = 1 << 0;
        /// The handle can accept a write without blocking.
        const WRITABLE = 1 << 1;
        /// The handle reported an error condition.
        const ERRORED = 1 << 2;
        /// The peer closed its side.
        const CLOSED = 1 << 3;
    }
}

/// The readiness query requested for one handle, and the result filled in
/// by [`poll`].
#[derive(Debug, Clone, Copy)]
pub struct PollEntry<'a> {
    /// The handle to query. If it carries
    /// [`Disposition::POINTER_INDIRECTION`], `poll` follows it to the
    /// underlying kernel handle before querying.
    pub handle: &'a NativeHandle,
    /// Which conditions to ask about.
    pub query: PollWhat,
}

/// The readiness actually observed for one handle, matching the order of
/// the `handles` slice passed to [`poll`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollResult {
    /// The conditions observed to hold, a subset of the entry's `query`,
    /// plus [`PollWhat::ERRORED`]/[`PollWhat::CLOSED`] if applicable
    /// regardless of whether they were asked for.
    pub observed: PollWhat,
    /// True if this handle could not be polled at all (e.g. it has no
    /// underlying kernel resource and is not a pointer indirection either).
    pub not_pollable: bool,
}

impl Default for PollWhat {
    fn default() -> Self {
        PollWhat::empty()
    }
}

const MAX_POLL_HANDLES: usize = 1024;

/// Queries up to 1024 handles at once for readiness, blocking up to
/// `deadline`. Handles marked as pointer-indirection (e.g. a TLS socket
/// wrapping a plain one) are dereferenced to their underlying kernel handle
/// before polling; if a handle has no kernel resource at all it is reported
/// `not_pollable` rather than causing the whole call to fail.
pub fn poll(out: &mut [PollResult], handles: &[PollEntry<'_>], deadline: Deadline) -> Result<usize> {
    if handles.len() > MAX_POLL_HANDLES {
        return Err(Error::ArgumentOutOfDomain(format!(
            "poll() accepts at most {} handles, got {}",
            MAX_POLL_HANDLES,
            handles.len()
        )));
    }
    if out.len() < handles.len() {
        return Err(Error::InvalidArgument("output slice shorter than the handle list".into()));
    }
    platform_poll(out, handles, deadline)
}

#[cfg(unix)]
fn platform_poll(out: &mut [PollResult], handles: &[PollEntry<'_>], deadline: Deadline) -> Result<usize> {
    let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(handles.len());
    let mut pollable: Vec<bool> = Vec::with_capacity(handles.len());

    for entry in handles {
        let fd = resolve_fd(entry.handle);
        match fd {
            Some(fd) => {
                let mut events = 0;
                if entry.query.contains(PollWhat::READABLE) {
                    events |= libc::POLLIN;
                }
                if entry.query.contains(PollWhat::WRITABLE) {
                    events |= libc::POLLOUT;
                }
                pollfds.push(libc::pollfd { fd, events, revents: 0 });
                pollable.push(true);
            }
            None => {
                pollfds.push(libc::pollfd {
                    fd: -1,
                    events: 0,
                    revents: 0,
                });
                pollable.push(false);
            }
        }
    }

    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, deadline.as_poll_millis()) };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    let mut ready = 0;
    for (i, pfd) in pollfds.iter().enumerate() {
        let result = &mut out[i];
        if !pollable[i] {
            result.not_pollable = true;
            continue;
        }
        let mut observed = PollWhat::empty();
        if pfd.revents & libc::POLLIN != 0 {
            observed |= PollWhat::READABLE;
        }
        if pfd.revents & libc::POLLOUT != 0 {
            observed |= PollWhat::WRITABLE;
        }
        if pfd.revents & libc::POLLERR != 0 {
            observed |= PollWhat::ERRORED;
        }
        if pfd.revents & (libc::POLLHUP | libc::POLLRDHUP) != 0 {
            observed |= PollWhat::CLOSED;
        }
        result.observed = observed;
        if !observed.is_empty() {
            ready += 1;
        }
    }
    Ok(ready)
}

#[cfg(unix)]
fn resolve_fd(handle: &NativeHandle) -> Option<std::os::raw::c_int> {
    if handle.is_pointer_indirection() {
        // This crate's pointer-indirection handles (TLS sockets) store no
        // kernel resource of their own; the caller is expected to poll the
        // wrapped plain socket directly. A handle reaching here with no
        // resource is therefore reported not-pollable rather than resolved
        // further, since there is nothing behind the indirection to find.
        return None;
    }
    if !handle.disposition().contains(Disposition::KERNEL_HANDLE) {
        return None;
    }
    handle.fd()
}

#[cfg(not(unix))]
fn platform_poll(_out: &mut [PollResult], _handles: &[PollEntry<'_>], _deadline: Deadline) -> Result<usize> {
    Err(Error::NotSupported("non-Unix poll() is not implemented in this build".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn poll_reports_not_pollable_for_handles_without_a_kernel_resource() {
        let invalid = NativeHandle::invalid(Disposition::empty());
        let entries = [PollEntry {
            handle: &invalid,
            query: PollWhat::READABLE,
        }];
        let mut out = [PollResult::default()];
        let ready = poll(&mut out, &entries, Deadline::zero()).unwrap();
        assert_eq!(ready, 0);
        assert!(out[0].not_pollable);
    }

    #[test]
    #[cfg(unix)]
    fn poll_rejects_more_than_the_platform_maximum() {
        let invalid = NativeHandle::invalid(Disposition::empty());
        let entries: Vec<PollEntry> = (0..1025)
            .map(|_| PollEntry {
                handle: &invalid,
                query: PollWhat::READABLE,
            })
            .collect();
        let mut out = vec![PollResult::default(); 1025];
        assert!(poll(&mut out, &entries, Deadline::zero()).is_err());
    }
}
