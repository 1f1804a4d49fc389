//! Fixed-capacity byte storage behind the channel lock.
//!
//! `FifoBuffer` is plain data: it knows nothing about locking or waiting.
//! The valid payload always sits at the front of `mem`; consuming bytes
//! shifts the remainder down so the next read starts at offset 0 again.
//!
//! ```text
//!  0                 len                  capacity
//!  ┌──────────────────┬──────────────────────┐
//!  │ unread payload   │ spare (unspecified)  │
//!  └──────────────────┴──────────────────────┘
//! ```
//!
//! Two claims cover transfers that run caller code with the lock released:
//! - `reserved` bytes of spare room are promised to pending writers and are
//!   not offered to anyone else. `len + reserved <= capacity` always holds.
//! - `draining` marks the front of the payload as owned by a pending reader.
//!   No other reader may consume while it is set.

/// Capacity used when none is configured (`0x1000`).
pub const DEFAULT_CAPACITY: usize = 0x1000;

/// How full the channel is.
///
/// Reads only ever move toward `Empty`, writes only toward `Full`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillLevel {
    Empty,
    Partial,
    Full,
}

pub(crate) struct FifoBuffer {
    mem: Box<[u8]>,
    /// Number of valid bytes at the front of `mem`. Always `<= mem.len()`.
    len: usize,
    reserved: usize,
    draining: bool,
}

impl FifoBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            mem: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            reserved: 0,
            draining: false,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.mem.len()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.len == self.mem.len()
    }

    /// Free bytes not already promised to a pending writer.
    #[inline]
    pub(crate) fn room(&self) -> usize {
        self.mem.len() - self.len - self.reserved
    }

    /// Writers park while this holds.
    #[inline]
    pub(crate) fn no_room(&self) -> bool {
        self.room() == 0
    }

    /// Readers park while this holds.
    #[inline]
    pub(crate) fn nothing_to_read(&self) -> bool {
        self.len == 0 || self.draining
    }

    pub(crate) fn reserve(&mut self, n: usize) {
        debug_assert!(n <= self.room(), "reserve past capacity");
        self.reserved += n;
    }

    pub(crate) fn unreserve(&mut self, n: usize) {
        debug_assert!(n <= self.reserved, "unreserve more than reserved");
        self.reserved -= n;
    }

    pub(crate) fn begin_drain(&mut self) {
        debug_assert!(!self.draining, "front already claimed");
        self.draining = true;
    }

    pub(crate) fn end_drain(&mut self) {
        self.draining = false;
    }

    pub(crate) fn fill_level(&self) -> FillLevel {
        if self.is_empty() {
            FillLevel::Empty
        } else if self.is_full() {
            FillLevel::Full
        } else {
            FillLevel::Partial
        }
    }

    /// The oldest `min(max, len)` unread bytes.
    #[inline]
    pub(crate) fn front(&self, max: usize) -> &[u8] {
        &self.mem[..max.min(self.len)]
    }

    /// Drops `n` bytes from the front and closes the gap.
    pub(crate) fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len, "consume past end of payload");
        self.mem.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// Spare region of `min(max, room)` bytes directly after the payload.
    ///
    /// Bytes written here become visible only after [`commit`](Self::commit).
    #[inline]
    pub(crate) fn spare(&mut self, max: usize) -> &mut [u8] {
        let n = max.min(self.room());
        let start = self.len;
        &mut self.mem[start..start + n]
    }

    pub(crate) fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.room(), "commit past capacity");
        self.len += n;
    }

    /// Zeroes the whole region. `len` is left as it is.
    pub(crate) fn zero(&mut self) {
        self.mem.fill(0);
    }

    /// The entire storage region, payload and spare alike.
    pub(crate) fn raw(&self) -> &[u8] {
        &self.mem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(buf: &mut FifoBuffer, data: &[u8]) -> usize {
        let spare = buf.spare(data.len());
        let n = spare.len();
        spare.copy_from_slice(&data[..n]);
        buf.commit(n);
        n
    }

    #[test]
    fn starts_empty() {
        let buf = FifoBuffer::new(16);
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.room(), 16);
        assert_eq!(buf.fill_level(), FillLevel::Empty);
        assert!(buf.front(4).is_empty());
    }

    #[test]
    fn spare_is_clamped_to_room() {
        let mut buf = FifoBuffer::new(4);
        assert_eq!(push(&mut buf, b"abcdef"), 4);
        assert!(buf.is_full());
        assert_eq!(buf.fill_level(), FillLevel::Full);
        assert!(buf.spare(10).is_empty());
    }

    #[test]
    fn consume_shifts_remaining_payload_to_front() {
        let mut buf = FifoBuffer::new(8);
        push(&mut buf, b"ABCDEF");
        assert_eq!(buf.front(3), b"ABC");
        buf.consume(3);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.front(usize::MAX), b"DEF");
        assert_eq!(&buf.raw()[..3], b"DEF");
        assert_eq!(buf.fill_level(), FillLevel::Partial);

        push(&mut buf, b"GH");
        assert_eq!(buf.front(usize::MAX), b"DEFGH");
    }

    #[test]
    fn consume_everything_leaves_empty() {
        let mut buf = FifoBuffer::new(8);
        push(&mut buf, b"xyz");
        buf.consume(3);
        assert!(buf.is_empty());
        assert_eq!(buf.room(), 8);
    }

    #[test]
    fn reservation_hides_room_from_other_writers() {
        let mut buf = FifoBuffer::new(8);
        push(&mut buf, b"abc");
        buf.reserve(5);
        assert!(buf.no_room());
        assert!(buf.spare(4).is_empty());

        buf.consume(2);
        assert_eq!(buf.room(), 2);

        buf.unreserve(5);
        assert_eq!(push(&mut buf, b"0123456789"), 7);
        assert_eq!(buf.front(usize::MAX), b"c0123456");
    }

    #[test]
    fn drain_claim_blocks_readers_only() {
        let mut buf = FifoBuffer::new(4);
        push(&mut buf, b"ab");
        assert!(!buf.nothing_to_read());

        buf.begin_drain();
        assert!(buf.nothing_to_read());
        assert!(!buf.no_room());
        assert_eq!(push(&mut buf, b"c"), 1);

        buf.end_drain();
        assert_eq!(buf.front(8), b"abc");
    }

    #[test]
    fn zero_keeps_length() {
        let mut buf = FifoBuffer::new(4);
        push(&mut buf, b"ab");
        buf.zero();
        assert_eq!(buf.len(), 2);
        assert!(buf.raw().iter().all(|&b| b == 0));
        assert_eq!(buf.front(8), &[0, 0]);
    }
}
