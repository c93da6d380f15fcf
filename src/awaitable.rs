//! The eager awaitable returned by the `*_async` methods on
//! [`crate::io_handle::ByteIoHandle`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Result;

/// An eager, immediately-pollable future wrapping the result of a read,
/// write, or barrier.
///
/// Every multiplexer backend in this crate runs an operation to
/// completion inside `init_io_operation` itself (see the "Ownership of
/// operation state" note in `DESIGN.md`), so construction and initiation
/// never actually suspend: this type exists to match the `*_async` API
/// shape described for handles with a multiplexer attached, not because
/// polling it can return `Pending`. Dropping an `Awaitable` before polling
/// it is always safe and cancels nothing, because there is never anything
/// left outstanding to cancel.
pub struct Awaitable<T> {
    result: Option<Result<T>>,
}

impl<T> Awaitable<T> {
    /// Wraps an already-computed result as an immediately-ready awaitable.
    pub fn from_result(result: Result<T>) -> Self {
        Awaitable { result: Some(result) }
    }

    /// True for every `Awaitable` this crate produces.
    pub fn is_ready(&self) -> bool {
        true
    }

    /// Takes the result without going through the `Future` machinery, for
    /// callers that already know the awaitable is ready.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        self.result.take()
    }
}

impl<T> Future for Awaitable<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.result.take() {
            Some(result) => Poll::Ready(result),
            None => panic!("Awaitable polled again after it already completed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: Future>(mut f: F) -> F::Output {
        use std::task::{RawWaker, RawWakerVTable, Waker};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let waker = unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) };
        let mut cx = Context::from_waker(&waker);
        let mut f = unsafe { Pin::new_unchecked(&mut f) };
        loop {
            if let Poll::Ready(v) = f.as_mut().poll(&mut cx) {
                return v;
            }
        }
    }

    #[test]
    fn ready_awaitable_resolves_immediately() {
        let a: Awaitable<u32> = Awaitable::from_result(Ok(42));
        assert!(a.is_ready());
        assert_eq!(block_on(a).unwrap(), 42);
    }
}
