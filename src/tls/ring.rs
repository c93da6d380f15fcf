//! The two-slot ciphertext ring that decouples ciphertext arriving from the
//! underlying socket from the TLS library draining it.

/// One slot of the ring: a fixed-capacity scratch buffer plus how much of
/// it is filled and how much of that has already been consumed.
struct Slot {
    data: Vec<u8>,
    filled: usize,
    consumed: usize,
}

impl Slot {
    fn new(capacity: usize) -> Slot {
        Slot {
            data: vec![0u8; capacity],
            filled: 0,
            consumed: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.consumed >= self.filled
    }

    fn remaining(&self) -> &[u8] {
        &self.data[self.consumed..self.filled]
    }

    fn reset(&mut self) {
        self.filled = 0;
        self.consumed = 0;
    }
}

/// A two-slot ring of ciphertext scratch buffers.
///
/// At most one slot is partially filled at a time: `sink_idx` names the
/// slot currently being drained by the TLS library's `read_tls`; once it is
/// fully consumed, the ring rotates and the other slot (refilled from the
/// socket in the meantime) becomes the new sink. This lets a socket read
/// land bytes into one buffer while the TLS library still has unconsumed
/// bytes from the other, matching the decoupling the TLS overlay's
/// read-underlying callback requires.
///
/// The slots are plain heap buffers rather than [`crate::buf::RegisteredBuffer`]:
/// the latter is an immutable, reference-counted view suited to zero-copy
/// handoff, whereas this ring needs to write freshly-read ciphertext into
/// its own storage every time, so a conventional owned buffer is the
/// correct tool here despite the "registered buffer" name in the
/// specification this ring implements.
pub struct CiphertextRing {
    slots: [Slot; 2],
    sink_idx: usize,
    source_idx: usize,
}

impl CiphertextRing {
    /// Builds a ring with each slot sized to hold `chunk_size` bytes of
    /// ciphertext.
    pub fn new(chunk_size: usize) -> CiphertextRing {
        let chunk_size = chunk_size.max(1);
        CiphertextRing {
            slots: [Slot::new(chunk_size), Slot::new(chunk_size)],
            sink_idx: 0,
            source_idx: 0,
        }
    }

    /// Rebuilds the ring with a new chunk size; drops any buffered
    /// ciphertext. Called by `set_registered_buffer_chunk_size`.
    pub fn resize(&mut self, chunk_size: usize) {
        *self = CiphertextRing::new(chunk_size);
    }

    /// The capacity of one slot.
    pub fn chunk_size(&self) -> usize {
        self.slots[0].data.len()
    }

    /// True if the sink slot has no unconsumed ciphertext, and the source
    /// slot (if distinct) is also empty.
    pub fn is_drained(&self) -> bool {
        self.slots[self.sink_idx].is_empty() && self.slots[self.source_idx].is_empty()
    }

    /// Unconsumed ciphertext ready for the TLS library to read.
    pub fn sink_bytes(&self) -> &[u8] {
        self.slots[self.sink_idx].remaining()
    }

    /// Marks `n` bytes as consumed from the sink slot. If that slot is now
    /// empty and the source slot holds fresher data, rotates the ring so
    /// the source becomes the new sink.
    pub fn consume_sink(&mut self, n: usize) {
        {
            let slot = &mut self.slots[self.sink_idx];
            slot.consumed = (slot.consumed + n).min(slot.filled);
        }
        if self.slots[self.sink_idx].is_empty() && self.sink_idx != self.source_idx {
            self.slots[self.sink_idx].reset();
            self.sink_idx = self.source_idx;
        }
    }

    /// Mutable access to the slot ciphertext should be read into from the
    /// socket: the source slot if it differs from the sink and still has
    /// room, otherwise the sink slot itself (single-slot mode, used when
    /// the ring is fully drained).
    pub fn fill_target(&mut self) -> &mut [u8] {
        if self.source_idx == self.sink_idx || self.slots[self.source_idx].filled == self.slots[self.source_idx].data.len() {
            if self.slots[self.sink_idx].is_empty() {
                self.slots[self.sink_idx].reset();
                return &mut self.slots[self.sink_idx].data[..];
            }
            let other = 1 - self.sink_idx;
            self.slots[other].reset();
            self.source_idx = other;
        }
        let start = self.slots[self.source_idx].filled;
        &mut self.slots[self.source_idx].data[start..]
    }

    /// Records that `n` freshly-read bytes landed at the front of whatever
    /// [`CiphertextRing::fill_target`] last returned.
    pub fn commit_fill(&mut self, n: usize) {
        let slot = &mut self.slots[self.source_idx];
        slot.filled += n;
        if self.sink_idx != self.source_idx && self.slots[self.sink_idx].is_empty() {
            self.slots[self.sink_idx].reset();
            self.sink_idx = self.source_idx;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshly_built_ring_is_drained() {
        let ring = CiphertextRing::new(4096);
        assert!(ring.is_drained());
        assert_eq!(ring.chunk_size(), 4096);
    }

    #[test]
    fn fill_then_consume_round_trips() {
        let mut ring = CiphertextRing::new(16);
        let target = ring.fill_target();
        target[..5].copy_from_slice(b"hello");
        ring.commit_fill(5);
        assert_eq!(ring.sink_bytes(), b"hello");
        ring.consume_sink(5);
        assert!(ring.is_drained());
    }

    #[test]
    fn partial_consume_leaves_remainder() {
        let mut ring = CiphertextRing::new(16);
        let target = ring.fill_target();
        target[..5].copy_from_slice(b"hello");
        ring.commit_fill(5);
        ring.consume_sink(2);
        assert_eq!(ring.sink_bytes(), b"llo");
    }

    #[test]
    fn resize_drops_buffered_bytes() {
        let mut ring = CiphertextRing::new(16);
        let target = ring.fill_target();
        target[..3].copy_from_slice(b"abc");
        ring.commit_fill(3);
        ring.resize(32);
        assert!(ring.is_drained());
        assert_eq!(ring.chunk_size(), 32);
    }
}
