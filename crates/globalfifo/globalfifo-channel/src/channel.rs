//! The shared bounded channel and its blocking transfer paths.
//!
//! # Design
//! - One [`parking_lot::Mutex`] guards the buffer and its length.
//! - `not_empty` parks readers, `not_full` parks writers.
//! - A blocked caller releases the lock while parked and re-checks its
//!   condition in a loop after every wakeup; a wakeup is never taken as proof
//!   that the condition holds.
//! - The buffer is only mutated once the awaited condition is confirmed, so
//!   an interrupted or timed-out wait leaves nothing behind.
//! - Caller-supplied sinks and sources never run under the lock. They work
//!   against a claim (`DrainClaim` / `RoomClaim`) that is settled afterwards,
//!   so a sink may itself be a handle on the same channel.
//!
//! Every session gets its own [`ChannelHandle`] from [`BoundedChannel::open`];
//! all handles share the one buffer.

use crate::buffer::{DEFAULT_CAPACITY, FifoBuffer, FillLevel};
use crate::error::{FifoError, Result};
use crate::handle::{ChannelHandle, OpenOptions};
use crate::interrupt::Interrupt;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Raw control code for [`ControlCommand::ClearBuffer`].
pub const MEM_CLEAR: u32 = 0x1;

/// Channel construction parameters.
#[derive(Debug, Copy, Clone)]
pub struct ChannelConfig {
    /// Buffer size in bytes, fixed for the life of the channel.
    pub capacity: usize,
}

impl ChannelConfig {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be positive");
        Self { capacity }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Commands accepted by [`ChannelHandle::control`].
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    /// Zero the whole buffer region.
    ClearBuffer = MEM_CLEAR,
}

impl ControlCommand {
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for ControlCommand {
    type Error = FifoError;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            MEM_CLEAR => Ok(ControlCommand::ClearBuffer),
            _ => Err(FifoError::InvalidArgument),
        }
    }
}

/// Point-in-time view of the channel, taken under the lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelStats {
    pub capacity: usize,
    pub len: usize,
    pub open_handles: usize,
}

/// How a single transfer may wait.
pub(crate) struct WaitPolicy<'a> {
    pub(crate) non_blocking: bool,
    pub(crate) interrupt: Option<&'a Interrupt>,
    pub(crate) timeout: Option<Duration>,
}

pub(crate) struct Shared {
    state: Mutex<FifoBuffer>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    open_handles: AtomicUsize,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(FifoBuffer::new(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            open_handles: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn handle_opened(&self) -> usize {
        self.open_handles.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn handle_closed(&self) -> usize {
        self.open_handles.fetch_sub(1, Ordering::Relaxed) - 1
    }

    /// Wakes every parked reader and writer so they re-check their state.
    ///
    /// Takes the lock first: a caller that has checked its interrupt but not
    /// yet parked still holds it, so the notify cannot slip in between.
    pub(crate) fn wake_all(&self) {
        let _guard = self.state.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Parks on `cond` while `blocked` holds.
    ///
    /// Returns with the lock held and `blocked` false, or with an error and
    /// the buffer untouched.
    fn wait_while(
        self: &Arc<Self>,
        guard: &mut MutexGuard<'_, FifoBuffer>,
        cond: &Condvar,
        blocked: fn(&FifoBuffer) -> bool,
        policy: &WaitPolicy<'_>,
    ) -> Result<()> {
        if !blocked(&**guard) {
            return Ok(());
        }
        if policy.non_blocking {
            return Err(FifoError::WouldBlock);
        }

        let _watch = policy.interrupt.map(|irq| irq.watch(self));
        let deadline = policy.timeout.map(|t| Instant::now() + t);

        while blocked(&**guard) {
            if policy.interrupt.is_some_and(Interrupt::is_raised) {
                debug!("blocked transfer interrupted");
                return Err(FifoError::Interrupted);
            }
            match deadline {
                Some(deadline) => {
                    if cond.wait_until(guard, deadline).timed_out() && blocked(&**guard) {
                        debug!("blocked transfer timed out");
                        return Err(FifoError::Interrupted);
                    }
                }
                None => cond.wait(guard),
            }
        }
        Ok(())
    }

    /// Copies up to `dst.len()` bytes off the front of the channel.
    pub(crate) fn read(self: &Arc<Self>, dst: &mut [u8], policy: &WaitPolicy<'_>) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        let mut buf = self.state.lock();
        self.wait_while(&mut buf, &self.not_empty, FifoBuffer::nothing_to_read, policy)?;

        let chunk = buf.front(dst.len());
        let n = chunk.len();
        dst[..n].copy_from_slice(chunk);
        buf.consume(n);
        let len = buf.len();

        self.not_full.notify_all();
        drop(buf);

        info!(bytes = n, current_len = len, "read");
        Ok(n)
    }

    /// Appends as much of `src` as there is room for.
    pub(crate) fn write(self: &Arc<Self>, src: &[u8], policy: &WaitPolicy<'_>) -> Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }

        let mut buf = self.state.lock();
        self.wait_while(&mut buf, &self.not_full, FifoBuffer::no_room, policy)?;

        let spare = buf.spare(src.len());
        let n = spare.len();
        spare.copy_from_slice(&src[..n]);
        buf.commit(n);
        let len = buf.len();

        self.not_empty.notify_all();
        drop(buf);

        info!(bytes = n, current_len = len, "written");
        Ok(n)
    }

    /// Hands up to `max` bytes from the front of the channel to `dst`.
    ///
    /// The front is claimed and copied out under the lock, then `dst` runs
    /// with the lock released. The bytes are consumed only once `dst`
    /// accepted all of them. Other readers wait while the claim is held;
    /// writers do not.
    pub(crate) fn read_into<W: io::Write + ?Sized>(
        self: &Arc<Self>,
        dst: &mut W,
        max: usize,
        policy: &WaitPolicy<'_>,
    ) -> Result<usize> {
        if max == 0 {
            return Ok(0);
        }

        let mut buf = self.state.lock();
        self.wait_while(&mut buf, &self.not_empty, FifoBuffer::nothing_to_read, policy)?;
        let staged = buf.front(max).to_vec();
        buf.begin_drain();
        drop(buf);

        let claim = DrainClaim { shared: self };
        dst.write_all(&staged).map_err(FifoError::Fault)?;
        let len = claim.consume(staged.len());

        info!(bytes = staged.len(), current_len = len, "read");
        Ok(staged.len())
    }

    /// Queues up to `len` bytes pulled from `src`, bounded by the free room.
    ///
    /// The room is reserved under the lock, then `src` runs with the lock
    /// released. `src` must yield every byte asked of it; otherwise the
    /// reservation is dropped and nothing is queued.
    pub(crate) fn write_from<R: io::Read + ?Sized>(
        self: &Arc<Self>,
        src: &mut R,
        len: usize,
        policy: &WaitPolicy<'_>,
    ) -> Result<usize> {
        if len == 0 {
            return Ok(0);
        }

        let mut buf = self.state.lock();
        self.wait_while(&mut buf, &self.not_full, FifoBuffer::no_room, policy)?;
        let n = len.min(buf.room());
        buf.reserve(n);
        drop(buf);

        let claim = RoomClaim { shared: self, n };
        let mut staged = vec![0u8; n];
        src.read_exact(&mut staged).map_err(FifoError::Fault)?;
        let current = claim.fill(&staged);

        info!(bytes = n, current_len = current, "written");
        Ok(n)
    }

    pub(crate) fn clear(&self) {
        self.state.lock().zero();
        info!("buffer set to zero");
    }
}

/// A reader's hold on the front of the buffer while its sink runs.
///
/// Dropped without [`consume`](Self::consume), e.g. on a sink error or
/// panic, it releases the front untouched.
struct DrainClaim<'a> {
    shared: &'a Shared,
}

impl DrainClaim<'_> {
    fn consume(self, n: usize) -> usize {
        let mut buf = self.shared.state.lock();
        buf.consume(n);
        let len = buf.len();
        self.shared.not_full.notify_all();
        drop(buf);
        len
    }
}

impl Drop for DrainClaim<'_> {
    fn drop(&mut self) {
        self.shared.state.lock().end_drain();
        self.shared.not_empty.notify_all();
    }
}

/// Room promised to a writer while its source runs.
struct RoomClaim<'a> {
    shared: &'a Shared,
    n: usize,
}

impl RoomClaim<'_> {
    /// Swaps the reservation for `data`. Returns the new length.
    fn fill(self, data: &[u8]) -> usize {
        debug_assert_eq!(data.len(), self.n);
        let mut buf = self.shared.state.lock();
        buf.unreserve(self.n);
        buf.spare(self.n).copy_from_slice(data);
        buf.commit(self.n);
        let len = buf.len();
        self.shared.not_empty.notify_all();
        drop(buf);
        std::mem::forget(self);
        len
    }
}

impl Drop for RoomClaim<'_> {
    fn drop(&mut self) {
        self.shared.state.lock().unreserve(self.n);
        self.shared.not_full.notify_all();
    }
}

/// A fixed-capacity, blocking FIFO byte channel.
///
/// Cloning is cheap and yields another owner of the same channel. The
/// buffer is freed when the last clone and the last handle are gone.
///
/// ```
/// use globalfifo_channel::{BoundedChannel, FifoError, OpenOptions};
///
/// let chan = BoundedChannel::with_capacity(8);
/// let tx = chan.open();
/// let rx = chan.open_with(OpenOptions::new().non_blocking(true));
///
/// assert_eq!(tx.write(b"hello").unwrap(), 5);
/// assert_eq!(rx.read_to_vec(3).unwrap(), b"hel");
/// assert_eq!(rx.read_to_vec(8).unwrap(), b"lo");
/// assert!(matches!(rx.read_to_vec(1), Err(FifoError::WouldBlock)));
/// ```
#[derive(Clone)]
pub struct BoundedChannel {
    shared: Arc<Shared>,
}

impl BoundedChannel {
    pub fn new(cfg: ChannelConfig) -> Self {
        debug!(capacity = cfg.capacity, "channel created");
        Self {
            shared: Arc::new(Shared::new(cfg.capacity)),
        }
    }

    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(ChannelConfig::new(capacity))
    }

    /// Opens a blocking session with no interrupt and no timeout.
    pub fn open(&self) -> ChannelHandle {
        self.open_with(OpenOptions::default())
    }

    pub fn open_with(&self, opts: OpenOptions) -> ChannelHandle {
        ChannelHandle::new(Arc::clone(&self.shared), opts)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fill_level(&self) -> FillLevel {
        self.shared.state.lock().fill_level()
    }

    pub fn stats(&self) -> ChannelStats {
        let buf = self.shared.state.lock();
        ChannelStats {
            capacity: buf.capacity(),
            len: buf.len(),
            open_handles: self.shared.open_handles.load(Ordering::Relaxed),
        }
    }

    /// Copy of the whole storage region, including bytes past the payload.
    pub fn raw_contents(&self) -> Vec<u8> {
        self.shared.state.lock().raw().to_vec()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Default for BoundedChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl fmt::Debug for BoundedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("BoundedChannel")
            .field("capacity", &stats.capacity)
            .field("len", &stats.len)
            .field("open_handles", &stats.open_handles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nb(chan: &BoundedChannel) -> ChannelHandle {
        chan.open_with(OpenOptions::new().non_blocking(true))
    }

    #[test]
    fn default_capacity_is_one_page() {
        let chan = BoundedChannel::default();
        assert_eq!(chan.capacity(), 4096);
        assert_eq!(chan.fill_level(), FillLevel::Empty);
    }

    #[test]
    #[should_panic(expected = "Capacity must be positive")]
    fn zero_capacity_panics() {
        let _ = ChannelConfig::new(0);
    }

    /// The walkthrough from the channel's reference behavior, step by step.
    #[test]
    fn eight_byte_walkthrough() {
        let chan = BoundedChannel::with_capacity(8);
        let h = nb(&chan);

        assert_eq!(h.write(b"ABCDEFGH").unwrap(), 8);
        assert_eq!(chan.len(), 8);
        assert_eq!(chan.fill_level(), FillLevel::Full);

        assert!(matches!(h.write(b"X"), Err(FifoError::WouldBlock)));
        assert_eq!(chan.len(), 8);

        assert_eq!(h.read_to_vec(3).unwrap(), b"ABC");
        assert_eq!(chan.len(), 5);

        assert_eq!(h.write(b"X").unwrap(), 1);
        assert_eq!(chan.len(), 6);

        assert_eq!(h.read_to_vec(10).unwrap(), b"DEFGHX");
        assert_eq!(chan.len(), 0);
        assert_eq!(chan.fill_level(), FillLevel::Empty);
    }

    #[test]
    fn nonblocking_read_on_empty() {
        let chan = BoundedChannel::with_capacity(4);
        let h = nb(&chan);
        let mut out = [0u8; 4];
        assert!(matches!(h.read(&mut out), Err(FifoError::WouldBlock)));
    }

    #[test]
    fn zero_length_transfers_never_wait() {
        let chan = BoundedChannel::with_capacity(2);
        // Blocking handle: an empty read and a zero write on a full channel
        // must both return immediately.
        let h = chan.open();
        assert_eq!(h.read(&mut []).unwrap(), 0);
        assert_eq!(h.write(b"ab").unwrap(), 2);
        assert_eq!(h.write(b"").unwrap(), 0);
        assert_eq!(chan.len(), 2);
    }

    #[test]
    fn oversized_write_is_short() {
        let chan = BoundedChannel::with_capacity(4);
        let h = nb(&chan);
        assert_eq!(h.write(b"abc").unwrap(), 3);
        assert_eq!(h.write(b"defgh").unwrap(), 1);
        assert_eq!(h.read_to_vec(16).unwrap(), b"abcd");
    }

    #[test]
    fn capacity_plus_k_needs_a_read_in_between() {
        let cap = 16;
        let data: Vec<u8> = (0..(cap as u8 + 5)).collect();
        let chan = BoundedChannel::with_capacity(cap);
        let h = nb(&chan);

        assert_eq!(h.write(&data).unwrap(), cap);
        assert!(matches!(h.write(&data[cap..]), Err(FifoError::WouldBlock)));
        assert_eq!(h.read_to_vec(5).unwrap(), &data[..5]);
        assert_eq!(h.write(&data[cap..]).unwrap(), 5);

        let rest = h.read_to_vec(usize::MAX).unwrap();
        assert_eq!(rest, &data[5..]);
    }

    #[test]
    fn clear_zeroes_region_but_keeps_length() {
        let chan = BoundedChannel::with_capacity(8);
        let h = nb(&chan);
        h.write(b"hello").unwrap();

        h.clear();
        assert!(chan.raw_contents().iter().all(|&b| b == 0));
        assert_eq!(chan.len(), 5);
        assert_eq!(h.read_to_vec(8).unwrap(), vec![0u8; 5]);
    }

    #[test]
    fn control_codes() {
        let chan = BoundedChannel::with_capacity(4);
        let h = nb(&chan);
        h.write(b"ab").unwrap();

        assert!(h.control(MEM_CLEAR).is_ok());
        assert_eq!(chan.raw_contents(), vec![0u8; 4]);
        assert!(matches!(h.control(0x2), Err(FifoError::InvalidArgument)));
        assert_eq!(ControlCommand::try_from(MEM_CLEAR).unwrap().code(), MEM_CLEAR);
    }

    #[test]
    fn faulting_sink_consumes_nothing() {
        struct Broken;
        impl io::Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "nope"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let chan = BoundedChannel::with_capacity(8);
        let h = nb(&chan);
        h.write(b"keep").unwrap();

        assert!(matches!(h.read_into(&mut Broken, 4), Err(FifoError::Fault(_))));
        assert_eq!(chan.len(), 4);
        assert_eq!(h.read_to_vec(4).unwrap(), b"keep");
    }

    #[test]
    fn short_source_appends_nothing() {
        let chan = BoundedChannel::with_capacity(8);
        let h = nb(&chan);
        let mut src: &[u8] = b"ab";

        assert!(matches!(h.write_from(&mut src, 4), Err(FifoError::Fault(_))));
        assert_eq!(chan.len(), 0);

        let mut src: &[u8] = b"abcdefghij";
        assert_eq!(h.write_from(&mut src, 10).unwrap(), 8);
        assert_eq!(src, b"ij");
    }

    #[test]
    fn stats_track_open_handles() {
        let chan = BoundedChannel::with_capacity(4);
        let a = chan.open();
        let b = chan.open();
        a.write(b"z").unwrap();
        assert_eq!(
            chan.stats(),
            ChannelStats {
                capacity: 4,
                len: 1,
                open_handles: 2
            }
        );
        a.close();
        drop(b);
        assert_eq!(chan.stats().open_handles, 0);
    }
}
