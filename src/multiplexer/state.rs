//! The operation lifecycle state machine shared by every multiplexer
//! backend.

use std::sync::Mutex;

use crate::buf::{Buffer, ConstBuffer, RegisteredBuffer};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::request::{BarrierKind, BarrierWait, IoRequest};

/// The lifecycle of an in-flight operation.
///
/// Three independent chains share one enum so a caller never has to match
/// on "is this a read-state or a write-state" separately from "what phase
/// is it in":
///
/// ```text
/// Unknown -> ReadInitialised   -> ReadInitiated  -> ReadCompleted          -> ReadFinished
/// Unknown -> WriteInitialised  -> WriteInitiated -> WriteOrBarrierCompleted -> WriteOrBarrierFinished
/// Unknown -> BarrierInitialised -> BarrierInitiated -> WriteOrBarrierCompleted -> WriteOrBarrierFinished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Freshly relocated or not yet constructed.
    Unknown,
    /// Constructed, not yet submitted.
    ReadInitialised,
    /// Submitted to the kernel or queued for batched submission.
    ReadInitiated,
    /// The kernel has produced a result; the visitor has not yet observed
    /// the finishing transition.
    ReadCompleted,
    /// Fully done; the result has been delivered.
    ReadFinished,
    /// Constructed, not yet submitted.
    WriteInitialised,
    /// Submitted to the kernel or queued for batched submission.
    WriteInitiated,
    /// Shared completed state for both write and barrier operations.
    WriteOrBarrierCompleted,
    /// Shared finished state for both write and barrier operations.
    WriteOrBarrierFinished,
    /// Constructed, not yet submitted.
    BarrierInitialised,
    /// Submitted to the kernel or queued for batched submission.
    BarrierInitiated,
}

impl Lifecycle {
    /// True if this is one of the three `*_initialised` states.
    pub fn is_initialised(&self) -> bool {
        matches!(
            self,
            Lifecycle::ReadInitialised | Lifecycle::WriteInitialised | Lifecycle::BarrierInitialised
        )
    }

    /// True if this is one of the three `*_initiated` states.
    pub fn is_initiated(&self) -> bool {
        matches!(
            self,
            Lifecycle::ReadInitiated | Lifecycle::WriteInitiated | Lifecycle::BarrierInitiated
        )
    }

    /// True if this is `ReadCompleted` or `WriteOrBarrierCompleted`.
    pub fn is_completed(&self) -> bool {
        matches!(self, Lifecycle::ReadCompleted | Lifecycle::WriteOrBarrierCompleted)
    }

    /// True if this is `ReadFinished` or `WriteOrBarrierFinished`.
    pub fn is_finished(&self) -> bool {
        matches!(self, Lifecycle::ReadFinished | Lifecycle::WriteOrBarrierFinished)
    }
}

/// The kind of operation an [`OperationState`] carries, with its
/// not-yet-completed parameters.
pub enum Request {
    Read {
        request: IoRequest<Buffer<'static>>,
        deadline: Deadline,
    },
    Write {
        request: IoRequest<ConstBuffer<'static>>,
        deadline: Deadline,
    },
    Barrier {
        request: IoRequest<ConstBuffer<'static>>,
        kind: BarrierKind,
        wait: BarrierWait,
        deadline: Deadline,
    },
}

/// The outcome payload stashed in an [`OperationState`] once the kernel has
/// produced a result, before the visitor's completed-callback has
/// (possibly) consumed it.
pub enum Outcome {
    /// Nothing has completed yet.
    Empty,
    /// A read completed, successfully or not.
    Read(Result<Vec<Buffer<'static>>, Error>),
    /// A write or barrier completed, successfully or not. Registered
    /// buffers flow through this path too since a multiplexer backend may
    /// promote a plain write to a registered one transparently.
    WriteOrBarrier(Result<Vec<ConstBuffer<'static>>, Error>),
    /// A registered-buffer write or barrier completed.
    WriteOrBarrierRegistered(Result<Vec<RegisteredBuffer>, Error>),
}

/// Callbacks invoked as an operation moves through its lifecycle.
///
/// Invoked with the per-state lock held when the state is
/// [`Multiplexer::synchronised`](crate::multiplexer::Multiplexer). A
/// `*_completed` callback that returns `true` has consumed the result: the
/// next observer of the state sees [`Outcome::Empty`].
pub trait Visitor: Send + Sync {
    /// The read has been submitted.
    fn read_initiated(&self) {}
    /// The read has a result. Return `true` to consume it.
    fn read_completed(&self, _outcome: &Outcome) -> bool {
        false
    }
    /// The read is fully finished.
    fn read_finished(&self) {}
    /// The write has been submitted.
    fn write_initiated(&self) {}
    /// The write has a result. Return `true` to consume it.
    fn write_completed(&self, _outcome: &Outcome) -> bool {
        false
    }
    /// The write is fully finished.
    fn write_finished(&self) {}
    /// The barrier has been submitted.
    fn barrier_initiated(&self) {}
    /// The barrier has a result. Return `true` to consume it.
    fn barrier_completed(&self, _outcome: &Outcome) -> bool {
        false
    }
    /// The barrier is fully finished.
    fn barrier_finished(&self) {}
}

/// Which of the three chains an [`Inner`] belongs to, tracked separately
/// from [`Lifecycle`] because `WriteOrBarrierCompleted`/`WriteOrBarrierFinished`
/// do not by themselves say whether this was a write or a barrier, and
/// [`Request`] is no longer available once `take_request` has consumed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Read,
    Write,
    Barrier,
}

struct Inner {
    lifecycle: Lifecycle,
    kind: OperationKind,
    request: Option<Request>,
    outcome: Outcome,
}

/// A single in-flight (or not-yet-submitted) read, write, or barrier
/// operation.
///
/// Owns its own lock (a plain [`std::sync::Mutex`], matching how mio
/// protects shared selector state rather than reaching for an external
/// lock crate) so both single- and multi-threaded multiplexer backends can
/// share one implementation; an unsynchronised multiplexer simply never
/// contends on it.
///
/// Invariant: once [`OperationState::lifecycle`] reports `is_initiated()`
/// and until it reports `is_finished()`, the state must not be moved except
/// via [`OperationState::relocate_to`], which itself refuses to run during
/// that window.
/// This crate cannot enforce that at the type level (there is no
/// `!Unpin`-for-values-not-behind-a-pointer primitive that fits this
/// shape) so, as in mio's `IoSource`, it is a documented discipline rather
/// than a compiler-checked one.
pub struct OperationState {
    inner: Mutex<Inner>,
    visitor: Option<Box<dyn Visitor>>,
}

impl OperationState {
    /// Constructs a read operation state, initialised but not submitted.
    pub fn new_read(
        request: IoRequest<Buffer<'static>>,
        deadline: Deadline,
        visitor: Option<Box<dyn Visitor>>,
    ) -> Self {
        OperationState {
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::ReadInitialised,
                kind: OperationKind::Read,
                request: Some(Request::Read { request, deadline }),
                outcome: Outcome::Empty,
            }),
            visitor,
        }
    }

    /// Constructs a write operation state, initialised but not submitted.
    pub fn new_write(
        request: IoRequest<ConstBuffer<'static>>,
        deadline: Deadline,
        visitor: Option<Box<dyn Visitor>>,
    ) -> Self {
        OperationState {
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::WriteInitialised,
                kind: OperationKind::Write,
                request: Some(Request::Write { request, deadline }),
                outcome: Outcome::Empty,
            }),
            visitor,
        }
    }

    /// Constructs a barrier operation state, initialised but not submitted.
    pub fn new_barrier(
        request: IoRequest<ConstBuffer<'static>>,
        kind: BarrierKind,
        wait: BarrierWait,
        deadline: Deadline,
        visitor: Option<Box<dyn Visitor>>,
    ) -> Self {
        OperationState {
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::BarrierInitialised,
                kind: OperationKind::Barrier,
                request: Some(Request::Barrier {
                    request,
                    kind,
                    wait,
                    deadline,
                }),
                outcome: Outcome::Empty,
            }),
            visitor,
        }
    }

    /// The current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().unwrap().lifecycle
    }

    /// Transitions `*_initialised -> *_initiated`, invoking the matching
    /// `*_initiated` visitor callback.
    pub(crate) fn mark_initiated(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.lifecycle = match inner.lifecycle {
            Lifecycle::ReadInitialised => Lifecycle::ReadInitiated,
            Lifecycle::WriteInitialised => Lifecycle::WriteInitiated,
            Lifecycle::BarrierInitialised => Lifecycle::BarrierInitiated,
            other => other,
        };
        let kind = inner.kind;
        drop(inner);
        if let Some(v) = &self.visitor {
            match kind {
                OperationKind::Read => v.read_initiated(),
                OperationKind::Write => v.write_initiated(),
                OperationKind::Barrier => v.barrier_initiated(),
            }
        }
    }

    /// Stashes a completed outcome and transitions to the matching
    /// `*_completed` state, invoking the visitor. If the visitor consumes
    /// the result, subsequent reads of the outcome observe
    /// [`Outcome::Empty`].
    ///
    /// Dispatches on the operation's recorded kind rather than on the shape
    /// of `outcome`, so a barrier's completion reaches
    /// [`Visitor::barrier_completed`] rather than falling through to
    /// `write_completed` the way a write's does.
    pub(crate) fn mark_completed(&self, outcome: Outcome) {
        let kind = {
            let mut inner = self.inner.lock().unwrap();
            inner.outcome = outcome;
            inner.lifecycle = if inner.kind == OperationKind::Read {
                Lifecycle::ReadCompleted
            } else {
                Lifecycle::WriteOrBarrierCompleted
            };
            inner.kind
        };
        if let Some(v) = &self.visitor {
            let mut inner = self.inner.lock().unwrap();
            let consumed = match kind {
                OperationKind::Read => v.read_completed(&inner.outcome),
                OperationKind::Write => v.write_completed(&inner.outcome),
                OperationKind::Barrier => v.barrier_completed(&inner.outcome),
            };
            if consumed {
                inner.outcome = Outcome::Empty;
            }
        }
    }

    /// Transitions `*_completed -> *_finished`, invoking the matching
    /// `*_finished` visitor callback.
    pub(crate) fn mark_finished(&self) {
        let mut inner = self.inner.lock().unwrap();
        let kind = inner.kind;
        inner.lifecycle = match inner.lifecycle {
            Lifecycle::ReadCompleted => Lifecycle::ReadFinished,
            Lifecycle::WriteOrBarrierCompleted => Lifecycle::WriteOrBarrierFinished,
            other => other,
        };
        drop(inner);
        if let Some(v) = &self.visitor {
            match kind {
                OperationKind::Read => v.read_finished(),
                OperationKind::Write => v.write_finished(),
                OperationKind::Barrier => v.barrier_finished(),
            }
        }
    }

    /// Takes the not-yet-completed request parameters, if any remain
    /// (they are consumed once submission begins).
    pub(crate) fn take_request(&self) -> Option<Request> {
        self.inner.lock().unwrap().request.take()
    }

    /// Runs `f` with the current outcome, without consuming it.
    pub fn with_outcome<R>(&self, f: impl FnOnce(&Outcome) -> R) -> R {
        let inner = self.inner.lock().unwrap();
        f(&inner.outcome)
    }

    /// Moves this state's lifecycle, kind, pending request and outcome into
    /// `dest`, and resets `self` to [`Lifecycle::Unknown`].
    ///
    /// `dest`'s own visitor is left untouched; only the mutable state
    /// behind the lock relocates. Forbidden while `self` is between
    /// `*_initiated` and `*_finished` (inclusive of `*_completed`), since a
    /// multiplexer backend may be holding a raw pointer to `self` until the
    /// finished transition and relocating out from under it would
    /// invalidate that pointer.
    pub fn relocate_to(&self, dest: &OperationState) -> Result<()> {
        let mut src = self.inner.lock().unwrap();
        if src.lifecycle.is_initiated() || src.lifecycle.is_completed() {
            return Err(Error::DeviceOrResourceBusy(
                "cannot relocate an operation state while an I/O operation is outstanding on it".into(),
            ));
        }
        let mut dst = dest.inner.lock().unwrap();
        dst.lifecycle = src.lifecycle;
        dst.kind = src.kind;
        dst.request = src.request.take();
        dst.outcome = std::mem::replace(&mut src.outcome, Outcome::Empty);
        src.lifecycle = Lifecycle::Unknown;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_exactly_one_state_per_chain() {
        assert!(Lifecycle::ReadInitialised.is_initialised());
        assert!(!Lifecycle::ReadInitialised.is_initiated());
        assert!(Lifecycle::WriteInitiated.is_initiated());
        assert!(Lifecycle::WriteOrBarrierCompleted.is_completed());
        assert!(Lifecycle::WriteOrBarrierFinished.is_finished());
        assert!(!Lifecycle::Unknown.is_initialised());
        assert!(!Lifecycle::Unknown.is_finished());
    }

    #[test]
    fn lifecycle_transitions_in_order() {
        let state = OperationState::new_write(
            IoRequest::new(0, vec![]),
            Deadline::never(),
            None,
        );
        assert_eq!(state.lifecycle(), Lifecycle::WriteInitialised);
        state.mark_initiated();
        assert_eq!(state.lifecycle(), Lifecycle::WriteInitiated);
        state.mark_completed(Outcome::WriteOrBarrier(Ok(vec![])));
        assert_eq!(state.lifecycle(), Lifecycle::WriteOrBarrierCompleted);
        state.mark_finished();
        assert_eq!(state.lifecycle(), Lifecycle::WriteOrBarrierFinished);
    }

    struct CountingVisitor {
        completed: std::sync::atomic::AtomicUsize,
    }
    impl Visitor for CountingVisitor {
        fn read_completed(&self, _outcome: &Outcome) -> bool {
            self.completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn consumed_outcome_reads_as_empty() {
        let visitor = Box::new(CountingVisitor {
            completed: std::sync::atomic::AtomicUsize::new(0),
        });
        let state = OperationState::new_read(IoRequest::new(0, vec![]), Deadline::never(), Some(visitor));
        state.mark_initiated();
        state.mark_completed(Outcome::Read(Ok(vec![])));
        state.with_outcome(|o| assert!(matches!(o, Outcome::Empty)));
    }

    struct BarrierVisitor {
        completed: std::sync::atomic::AtomicBool,
        finished: std::sync::atomic::AtomicBool,
    }
    impl Visitor for BarrierVisitor {
        fn barrier_completed(&self, _outcome: &Outcome) -> bool {
            self.completed.store(true, std::sync::atomic::Ordering::SeqCst);
            false
        }
        fn barrier_finished(&self) {
            self.finished.store(true, std::sync::atomic::Ordering::SeqCst);
        }
        fn write_completed(&self, _outcome: &Outcome) -> bool {
            panic!("barrier must not dispatch to write_completed");
        }
        fn write_finished(&self) {
            panic!("barrier must not dispatch to write_finished");
        }
    }

    #[test]
    fn barrier_dispatches_to_barrier_callbacks() {
        let visitor = Box::new(BarrierVisitor {
            completed: std::sync::atomic::AtomicBool::new(false),
            finished: std::sync::atomic::AtomicBool::new(false),
        });
        let state = OperationState::new_barrier(
            IoRequest::new(0, vec![]),
            BarrierKind::All,
            BarrierWait::Waiting,
            Deadline::never(),
            Some(visitor),
        );
        state.mark_initiated();
        assert_eq!(state.lifecycle(), Lifecycle::BarrierInitiated);
        state.mark_completed(Outcome::WriteOrBarrier(Ok(vec![])));
        state.mark_finished();
        assert_eq!(state.lifecycle(), Lifecycle::WriteOrBarrierFinished);
    }

    #[test]
    fn relocate_moves_lifecycle_and_is_refused_while_initiated() {
        let src = OperationState::new_write(IoRequest::new(0, vec![]), Deadline::never(), None);
        let dst = OperationState::new_write(IoRequest::new(0, vec![]), Deadline::never(), None);
        src.mark_initiated();
        assert!(src.relocate_to(&dst).is_err());
        src.mark_completed(Outcome::WriteOrBarrier(Ok(vec![])));
        assert!(src.relocate_to(&dst).is_err());
        src.mark_finished();
        assert!(src.relocate_to(&dst).is_ok());
        assert_eq!(src.lifecycle(), Lifecycle::Unknown);
        assert_eq!(dst.lifecycle(), Lifecycle::WriteOrBarrierFinished);
    }
}
