//! Scatter/gather I/O requests and their results.

use crate::error::Error;

/// A scatter/gather list of buffers plus a 64-bit byte extent.
///
/// `B` is one of the three buffer flavors in [`crate::buf`]. The same type
/// is used for reads (`Buffer`), writes (`ConstBuffer`), and registered-
/// buffer variants of either.
#[derive(Debug)]
pub struct IoRequest<B> {
    /// Byte offset into the handle at which this request begins.
    pub offset: u64,
    /// The scatter/gather list.
    pub buffers: Vec<B>,
}

impl<B> IoRequest<B> {
    /// Builds a request at the given offset with the given buffer list.
    pub fn new(offset: u64, buffers: Vec<B>) -> Self {
        IoRequest { offset, buffers }
    }

    /// Builds a request at offset zero with a single buffer, the common
    /// case for stream-oriented handles like sockets.
    pub fn single(buffer: B) -> Self {
        IoRequest {
            offset: 0,
            buffers: vec![buffer],
        }
    }
}

/// Which kind of ordering guarantee a [`crate::io_handle::ByteIoHandle::barrier`]
/// call requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierKind {
    /// Only previously written *metadata* (file size, allocation) need
    /// reach storage before subsequently written data.
    ViewOnly,
    /// Only previously written *data* need reach storage; metadata may lag.
    DataOnly,
    /// Everything previously written must reach storage.
    All,
}

/// Whether a [`crate::io_handle::ByteIoHandle::barrier`] call waits for the
/// flush to complete before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierWait {
    /// Return once the flush has been requested; do not wait for completion.
    NonWaiting,
    /// Wait for the flush to actually complete.
    Waiting,
}

/// The outcome of a successful read, write, or barrier: the list of buffers
/// actually transferred, which may be shorter than what was requested, with
/// per-buffer lengths rewritten to the bytes actually moved.
#[derive(Debug)]
pub struct IoResult<B> {
    buffers: Vec<B>,
    total_bytes: Option<u64>,
}

impl<B> IoResult<B> {
    /// Wraps a transferred buffer list. The total byte count is computed
    /// lazily from it on first access.
    pub fn new(buffers: Vec<B>) -> Self {
        IoResult {
            buffers,
            total_bytes: None,
        }
    }

    /// The buffers actually transferred.
    pub fn buffers(&self) -> &[B] {
        &self.buffers
    }

    /// Consumes the result, returning the transferred buffers.
    pub fn into_buffers(self) -> Vec<B> {
        self.buffers
    }
}

impl<B: AsByteLen> IoResult<B> {
    /// The total number of bytes transferred, computed (and cached) from
    /// the per-buffer lengths on first access.
    pub fn total_bytes(&mut self) -> u64 {
        if let Some(cached) = self.total_bytes {
            return cached;
        }
        let total = self.buffers.iter().map(|b| b.byte_len() as u64).sum();
        self.total_bytes = Some(total);
        total
    }
}

/// Reports a buffer's length in bytes, letting [`IoResult::total_bytes`]
/// stay generic over `Buffer`, `ConstBuffer`, and `RegisteredBuffer`.
pub trait AsByteLen {
    /// The length of this buffer in bytes.
    fn byte_len(&self) -> usize;
}

impl<'a> AsByteLen for crate::buf::Buffer<'a> {
    fn byte_len(&self) -> usize {
        self.len()
    }
}

impl<'a> AsByteLen for crate::buf::ConstBuffer<'a> {
    fn byte_len(&self) -> usize {
        self.len()
    }
}

impl AsByteLen for crate::buf::RegisteredBuffer {
    fn byte_len(&self) -> usize {
        self.len()
    }
}

/// The result type for I/O operations: a categorized [`Error`] on failure,
/// matching the "API calls never throw on expected errors" contract.
pub type IoOutcome<B> = Result<IoResult<B>, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::ConstBuffer;

    #[test]
    fn total_bytes_sums_and_caches() {
        let data_a = [1u8, 2, 3];
        let data_b = [4u8, 5];
        let mut result = IoResult::new(vec![ConstBuffer::new(&data_a), ConstBuffer::new(&data_b)]);
        assert_eq!(result.total_bytes(), 5);
        // Second call exercises the cached path.
        assert_eq!(result.total_bytes(), 5);
    }

    #[test]
    fn single_request_has_one_buffer_at_offset_zero() {
        let data = [0u8; 4];
        let req = IoRequest::single(ConstBuffer::new(&data));
        assert_eq!(req.offset, 0);
        assert_eq!(req.buffers.len(), 1);
    }
}
