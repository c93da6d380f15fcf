//! The pluggable I/O multiplexer: a trait implemented by the synchronous
//! fallback and by each platform-specific backend.

mod epoll;
mod io_uring_backend;
mod null;
mod sync_fallback;
mod state;

#[cfg(windows)]
mod iocp;

pub use state::{Lifecycle, Outcome, OperationState, Request, Visitor};
pub use null::NullMultiplexer;
pub use sync_fallback::SyncFallbackMultiplexer;

#[cfg(all(target_os = "linux", feature = "io-uring"))]
pub use io_uring_backend::IoUringMultiplexer;

#[cfg(unix)]
pub use epoll::EpollMultiplexer;

#[cfg(windows)]
pub use iocp::IocpMultiplexer;

use crate::deadline::Deadline;
use crate::error::Result;

/// The `(size, alignment)` a multiplexer reports its operation states need.
///
/// Kept for parity with a layered design where a caller stack-allocates
/// conformant storage before calling `construct()`; this crate's
/// `OperationState` owns its storage on the heap instead (see the
/// "Ownership of operation state" note in `DESIGN.md`), so this value is
/// informational rather than load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRequirements {
    /// Size in bytes.
    pub size: usize,
    /// Required alignment in bytes.
    pub align: usize,
}

/// Statistics returned by [`Multiplexer::check_for_any_completed_io`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionStats {
    /// Operations that transitioned to a `*_completed` state this call.
    pub completed: usize,
    /// Operations that transitioned to a `*_finished` state this call.
    pub finished: usize,
}

/// A token identifying a handle registered with a multiplexer, opaque to
/// callers; returned by [`Multiplexer::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(pub(crate) u64);

/// Bits a successful [`Multiplexer::register`] reports back into the
/// handle's native descriptor, mirroring the two multiplexer-state bits in
/// [`crate::handle::Disposition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistrationResult {
    /// Token identifying this registration, used by `deregister` and by
    /// completion delivery.
    pub token: RegistrationToken,
    /// True if this backend was able to arrange for synchronously-completed
    /// I/O to skip the completion queue entirely (sets
    /// `MULTIPLEXER_STATE_0`).
    pub supports_immediate_completion: bool,
}

/// Owns kernel multiplexing resources (an epoll/io_uring/IOCP handle, or
/// nothing for the synchronous fallback) and drives operation states
/// through their lifecycle.
///
/// Mirrors mio's `Poll`/`Selector` split conceptually, but widened so the
/// multiplexer itself owns operation-state bookkeeping rather than leaving
/// it to the caller.
pub trait Multiplexer: Send + Sync {
    /// `(size, align)` this backend's operation states need; see
    /// [`StateRequirements`].
    fn io_state_requirements(&self) -> StateRequirements {
        StateRequirements {
            size: std::mem::size_of::<OperationState>(),
            align: std::mem::align_of::<OperationState>(),
        }
    }

    /// True if this backend must guard shared state with a lock because
    /// `check_for_any_completed_io` may be called from multiple threads
    /// concurrently. The synchronous fallback and null backend report
    /// `false`; every real kernel-backed backend reports `true`.
    fn synchronised(&self) -> bool;

    /// Registers a raw platform handle (a file descriptor on Unix, a
    /// `HANDLE`/`SOCKET` on Windows) with this multiplexer.
    ///
    /// # Safety
    /// `raw` must be a valid, open OS handle for the lifetime of the
    /// registration.
    unsafe fn register(&self, raw: crate::handle::RawHandle) -> Result<RegistrationResult>;

    /// Deregisters a previously-registered handle. Idempotent: deregistering
    /// an unknown token is a no-op.
    fn deregister(&self, token: RegistrationToken) -> Result<()>;

    /// Transitions an operation state from `*_initialised` to `*_initiated`
    /// (or straight through to `*_completed`/`*_finished` if the I/O
    /// completes synchronously and the immediate-completion optimisation
    /// applies).
    fn init_io_operation(&self, token: RegistrationToken, state: &OperationState) -> Result<()>;

    /// Guarantees any batched (but not yet submitted) initiations reach the
    /// kernel. A no-op on backends that never batch.
    fn flush_inited_io_operations(&self) -> Result<()> {
        Ok(())
    }

    /// Asks for the current state of `state`, possibly advancing it
    /// without blocking.
    fn check_io_operation(&self, state: &OperationState) -> Lifecycle {
        state.lifecycle()
    }

    /// Issues the platform cancel primitive for `state` and waits up to
    /// `deadline` for the transition to complete. A no-op if `state` has
    /// already finished.
    fn cancel_io_operation(&self, token: RegistrationToken, state: &OperationState, deadline: Deadline) -> Result<()>;

    /// Pumps up to `max_completions` completions from the kernel, invoking
    /// each affected state's visitor and advancing its lifecycle. Never
    /// fails merely because the deadline elapsed with nothing to report.
    fn check_for_any_completed_io(&self, deadline: Deadline, max_completions: usize) -> Result<CompletionStats>;

    /// Posts a sentinel completion so that exactly one thread currently
    /// inside [`Multiplexer::check_for_any_completed_io`] returns promptly.
    fn wake_check_for_any_completed_io(&self) -> Result<()>;
}
