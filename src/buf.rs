//! The three buffer flavors used throughout the scatter/gather API.

use std::sync::Arc;

/// A mutable destination buffer for reads.
///
/// Trivially copyable (pointer + length); borrows the caller's memory for
/// the duration of the call. After a `read` completes, the length reported
/// back reflects only the bytes actually transferred (see
/// [`crate::request::IoResult`]).
#[derive(Debug)]
pub struct Buffer<'a> {
    data: &'a mut [u8],
}

impl<'a> Buffer<'a> {
    /// Wraps a mutable slice as a read destination.
    pub fn new(data: &'a mut [u8]) -> Self {
        Buffer { data }
    }

    /// The buffer's current length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrows the full buffer as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data
    }

    /// Borrows the buffer as an immutable slice.
    pub fn as_slice(&self) -> &[u8] {
        self.data
    }

    /// Returns a copy of this buffer truncated to `new_len` bytes, matching
    /// the "shorter-or-equal" contract `read`/`write` use to report partial
    /// transfers. Panics if `new_len` exceeds the current length.
    pub fn truncated_to(self, new_len: usize) -> Buffer<'a> {
        assert!(new_len <= self.data.len());
        Buffer {
            data: &mut self.data[..new_len],
        }
    }
}

/// An immutable source buffer for writes.
#[derive(Debug, Clone, Copy)]
pub struct ConstBuffer<'a> {
    data: &'a [u8],
}

impl<'a> ConstBuffer<'a> {
    /// Wraps an immutable slice as a write source.
    pub fn new(data: &'a [u8]) -> Self {
        ConstBuffer { data }
    }

    /// The buffer's current length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrows the buffer as an immutable slice.
    pub fn as_slice(&self) -> &[u8] {
        self.data
    }

    /// Returns a copy of this buffer truncated to `new_len` bytes. Panics if
    /// `new_len` exceeds the current length.
    pub fn truncated_to(self, new_len: usize) -> ConstBuffer<'a> {
        assert!(new_len <= self.data.len());
        ConstBuffer {
            data: &self.data[..new_len],
        }
    }
}

/// A reference-counted span of registered (e.g. kernel-pinned) memory.
///
/// Shared via reference counting; the underlying allocation is freed when
/// the last clone drops. Slicing a `RegisteredBuffer` keeps the whole
/// backing allocation alive, matching the contract that a registered
/// buffer's lifetime is independent of any single request that uses it.
#[derive(Debug, Clone)]
pub struct RegisteredBuffer {
    storage: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl RegisteredBuffer {
    /// Allocates a fresh registered buffer of at least `bytes` bytes.
    ///
    /// The default, platform-agnostic implementation rounds up to a large
    /// page boundary (2 MiB) when `bytes` is itself a multiple of one, and
    /// to an ordinary page (4 KiB) otherwise; a multiplexer backend with a
    /// real pinned-memory pool overrides this allocation strategy.
    pub fn allocate(bytes: usize) -> RegisteredBuffer {
        const PAGE: usize = 4096;
        const LARGE_PAGE: usize = 2 * 1024 * 1024;
        let rounded = if bytes > 0 && bytes % LARGE_PAGE == 0 {
            bytes
        } else {
            round_up(bytes, PAGE)
        };
        let storage: Arc<[u8]> = vec![0u8; rounded].into();
        RegisteredBuffer {
            len: storage.len(),
            storage,
            offset: 0,
        }
    }

    /// Wraps an already-allocated, already-registered region. Used by
    /// multiplexer backends that maintain their own pinned-memory pool.
    pub fn from_arc(storage: Arc<[u8]>) -> RegisteredBuffer {
        let len = storage.len();
        RegisteredBuffer {
            storage,
            offset: 0,
            len,
        }
    }

    /// The number of bytes actually backing this buffer (may exceed what
    /// was requested from [`RegisteredBuffer::allocate`]).
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of live references to the backing allocation.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// Borrows the buffer's bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }

    /// Returns a new `RegisteredBuffer` viewing `[start, start + len)` of
    /// this one, sharing the same backing allocation.
    pub fn slice(&self, start: usize, len: usize) -> RegisteredBuffer {
        assert!(start + len <= self.len);
        RegisteredBuffer {
            storage: self.storage.clone(),
            offset: self.offset + start,
            len,
        }
    }

    /// Returns a copy of this buffer truncated to `new_len` bytes, for the
    /// "shorter-or-equal" result contract.
    pub fn truncated_to(&self, new_len: usize) -> RegisteredBuffer {
        self.slice(0, new_len)
    }
}

fn round_up(value: usize, multiple: usize) -> usize {
    if value == 0 {
        return multiple;
    }
    value.div_ceil(multiple) * multiple
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_truncation_preserves_prefix() {
        let mut data = [1u8, 2, 3, 4, 5];
        let buf = Buffer::new(&mut data).truncated_to(3);
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn registered_buffer_allocate_rounds_up_to_page() {
        let buf = RegisteredBuffer::allocate(1);
        assert_eq!(buf.len(), 4096);
    }

    #[test]
    fn registered_buffer_allocate_prefers_large_page_when_aligned() {
        let buf = RegisteredBuffer::allocate(2 * 1024 * 1024);
        assert_eq!(buf.len(), 2 * 1024 * 1024);
    }

    #[test]
    fn registered_buffer_is_shared_and_freed_on_last_drop() {
        let buf = RegisteredBuffer::allocate(4096);
        assert_eq!(buf.ref_count(), 1);
        let clone = buf.clone();
        assert_eq!(buf.ref_count(), 2);
        drop(clone);
        assert_eq!(buf.ref_count(), 1);
    }

    #[test]
    fn registered_buffer_slice_shares_allocation() {
        let buf = RegisteredBuffer::allocate(4096);
        let sub = buf.slice(0, 100);
        assert_eq!(sub.len(), 100);
        assert_eq!(buf.ref_count(), 2);
    }
}
