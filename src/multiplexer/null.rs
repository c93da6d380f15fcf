//! A multiplexer backend that accepts every operation and completes it on
//! the next pump, with no real kernel interaction. Used to benchmark the
//! framework's own overhead independent of any I/O backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::deadline::Deadline;
use crate::diag::trace_io;
use crate::error::Result;
use crate::handle::RawHandle;

use super::{
    CompletionStats, Lifecycle, Multiplexer, Outcome, OperationState, RegistrationResult,
    RegistrationToken,
};

/// See the module documentation.
pub struct NullMultiplexer {
    next_token: AtomicU64,
    pending: Mutex<VecDeque<()>>,
}

impl Default for NullMultiplexer {
    fn default() -> Self {
        NullMultiplexer {
            next_token: AtomicU64::new(1),
            pending: Mutex::new(VecDeque::new()),
        }
    }
}

impl NullMultiplexer {
    /// Builds a fresh null multiplexer.
    pub fn new() -> Self {
        trace_io!("selected null multiplexer backend");
        Self::default()
    }
}

impl Multiplexer for NullMultiplexer {
    fn synchronised(&self) -> bool {
        false
    }

    unsafe fn register(&self, _raw: RawHandle) -> Result<RegistrationResult> {
        let token = RegistrationToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        Ok(RegistrationResult {
            token,
            supports_immediate_completion: true,
        })
    }

    fn deregister(&self, _token: RegistrationToken) -> Result<()> {
        Ok(())
    }

    fn init_io_operation(&self, _token: RegistrationToken, state: &OperationState) -> Result<()> {
        state.mark_initiated();
        let outcome = match state.lifecycle() {
            Lifecycle::ReadInitiated => Outcome::Read(Ok(Vec::new())),
            _ => Outcome::WriteOrBarrier(Ok(Vec::new())),
        };
        state.mark_completed(outcome);
        state.mark_finished();
        self.pending.lock().unwrap().push_back(());
        Ok(())
    }

    fn cancel_io_operation(&self, _token: RegistrationToken, _state: &OperationState, _deadline: Deadline) -> Result<()> {
        Ok(())
    }

    fn check_for_any_completed_io(&self, _deadline: Deadline, max_completions: usize) -> Result<CompletionStats> {
        let mut pending = self.pending.lock().unwrap();
        let mut stats = CompletionStats::default();
        while stats.completed < max_completions {
            if pending.pop_front().is_none() {
                break;
            }
            stats.completed += 1;
            stats.finished += 1;
        }
        Ok(stats)
    }

    fn wake_check_for_any_completed_io(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::ConstBuffer;
    use crate::request::IoRequest;

    #[test]
    fn operations_complete_immediately() {
        let mux = NullMultiplexer::new();
        let token = unsafe { mux.register(RawHandle::Invalid).unwrap().token };
        let state = OperationState::new_write(IoRequest::new(0, vec![] as Vec<ConstBuffer>), Deadline::never(), None);
        mux.init_io_operation(token, &state).unwrap();
        assert_eq!(state.lifecycle(), Lifecycle::WriteOrBarrierFinished);
    }
}
