//! Per-session access to a [`BoundedChannel`](crate::BoundedChannel).
//!
//! A handle owns nothing but session state: its blocking mode, an optional
//! interrupt token and timeout, and an advisory cursor. The cursor is moved
//! by [`ChannelHandle::seek`] only; reads and writes always act on the front
//! and back of the queue no matter where it points.

use crate::channel::{ControlCommand, Shared, WaitPolicy};
use crate::error::{FifoError, Result};
use crate::interrupt::Interrupt;
use std::fmt;
use std::io::{self, SeekFrom};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Origin for [`ChannelHandle::seek`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekMode {
    /// Offset from position 0.
    Absolute,
    /// Offset from the current cursor.
    Relative,
    /// Offset from the end. Not supported; always rejected.
    End,
}

impl TryFrom<i32> for SeekMode {
    type Error = FifoError;

    /// Maps `SEEK_SET`/`SEEK_CUR`/`SEEK_END` style whence codes.
    fn try_from(whence: i32) -> Result<Self> {
        match whence {
            0 => Ok(SeekMode::Absolute),
            1 => Ok(SeekMode::Relative),
            2 => Ok(SeekMode::End),
            _ => Err(FifoError::InvalidArgument),
        }
    }
}

/// Session flags chosen at open time.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    non_blocking: bool,
    interrupt: Option<Interrupt>,
    timeout: Option<Duration>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `WouldBlock` instead of waiting.
    pub fn non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    /// Token that can cancel this session's blocked transfers.
    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Upper bound on any single blocking wait.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One open session on a channel.
pub struct ChannelHandle {
    shared: Arc<Shared>,
    position: u64,
    non_blocking: bool,
    interrupt: Option<Interrupt>,
    timeout: Option<Duration>,
}

impl ChannelHandle {
    pub(crate) fn new(shared: Arc<Shared>, opts: OpenOptions) -> Self {
        let open_handles = shared.handle_opened();
        debug!(open_handles, non_blocking = opts.non_blocking, "handle opened");
        Self {
            shared,
            position: 0,
            non_blocking: opts.non_blocking,
            interrupt: opts.interrupt,
            timeout: opts.timeout,
        }
    }

    fn policy(&self) -> WaitPolicy<'_> {
        WaitPolicy {
            non_blocking: self.non_blocking,
            interrupt: self.interrupt.as_ref(),
            timeout: self.timeout,
        }
    }

    /// Reads up to `buf.len()` bytes, waiting for data if the channel is
    /// empty and the handle is blocking.
    ///
    /// A short read is normal; `Ok(0)` only comes back for an empty `buf`.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.shared.read(buf, &self.policy())
    }

    /// Like [`read`](Self::read) but returns the bytes.
    pub fn read_to_vec(&self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.shared.read_into(&mut out, max_bytes, &self.policy())?;
        Ok(out)
    }

    /// Reads up to `max_bytes` into an arbitrary sink.
    ///
    /// The sink runs without the channel lock, so it may be another handle
    /// on the same channel. While it runs the bytes it was given stay at the
    /// front of the channel and other readers wait. If the sink fails the
    /// result is [`FifoError::Fault`] and nothing is consumed.
    pub fn read_into<W: io::Write + ?Sized>(&self, dst: &mut W, max_bytes: usize) -> Result<usize> {
        self.shared.read_into(dst, max_bytes, &self.policy())
    }

    /// Writes as much of `data` as fits, waiting for room if the channel is
    /// full and the handle is blocking. Returns the number of bytes queued.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.shared.write(data, &self.policy())
    }

    /// Queues up to `len` bytes pulled from `src`.
    ///
    /// The amount requested from `src` is `len` clamped to the free room,
    /// which stays reserved while `src` runs without the channel lock.
    /// `src` has to deliver every byte requested of it, otherwise the call
    /// fails with [`FifoError::Fault`] and nothing is queued.
    pub fn write_from<R: io::Read + ?Sized>(&self, src: &mut R, len: usize) -> Result<usize> {
        self.shared.write_from(src, len, &self.policy())
    }

    /// Keeps writing until all of `data` is queued.
    ///
    /// Errors from the underlying writes are returned as-is; bytes queued
    /// before the error stay queued.
    pub fn write_all(&self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data)?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Moves the advisory cursor. The result must land in `[0, capacity]`;
    /// otherwise the cursor is left alone and `InvalidArgument` returned.
    pub fn seek(&mut self, offset: i64, mode: SeekMode) -> Result<u64> {
        let capacity = self.shared.capacity() as u64;
        let target = match mode {
            SeekMode::Absolute => u64::try_from(offset).ok(),
            SeekMode::Relative => self.position.checked_add_signed(offset),
            SeekMode::End => None,
        };

        match target {
            Some(pos) if pos <= capacity => {
                self.position = pos;
                Ok(pos)
            }
            _ => Err(FifoError::InvalidArgument),
        }
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Zeroes the buffer region. The queued length is not reset, so queued
    /// bytes read back as zeros.
    pub fn clear(&self) {
        self.shared.clear();
    }

    /// Runs a raw control command.
    pub fn control(&self, code: u32) -> Result<()> {
        match ControlCommand::try_from(code)? {
            ControlCommand::ClearBuffer => self.clear(),
        }
        Ok(())
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn set_nonblocking(&mut self, non_blocking: bool) {
        self.non_blocking = non_blocking;
    }

    #[inline]
    pub fn is_nonblocking(&self) -> bool {
        self.non_blocking
    }

    pub fn set_interrupt(&mut self, interrupt: Option<Interrupt>) {
        self.interrupt = interrupt;
    }

    pub fn interrupt(&self) -> Option<&Interrupt> {
        self.interrupt.as_ref()
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Ends the session. Equivalent to dropping the handle.
    pub fn close(self) {}
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        let open_handles = self.shared.handle_closed();
        debug!(open_handles, "handle closed");
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("position", &self.position)
            .field("non_blocking", &self.non_blocking)
            .field("interrupt", &self.interrupt)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl io::Read for ChannelHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ChannelHandle::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for ChannelHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ChannelHandle::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for ChannelHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (offset, mode) = match pos {
            SeekFrom::Start(n) => (
                i64::try_from(n).map_err(|_| io::Error::from(FifoError::InvalidArgument))?,
                SeekMode::Absolute,
            ),
            SeekFrom::Current(n) => (n, SeekMode::Relative),
            SeekFrom::End(n) => (n, SeekMode::End),
        };
        ChannelHandle::seek(self, offset, mode).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundedChannel;
    use std::io::{Read, Seek, Write};

    #[test]
    fn seek_bounds() {
        let chan = BoundedChannel::with_capacity(16);
        let mut h = chan.open();

        assert_eq!(h.seek(16, SeekMode::Absolute).unwrap(), 16);
        assert!(matches!(h.seek(17, SeekMode::Absolute), Err(FifoError::InvalidArgument)));
        assert!(matches!(h.seek(-1, SeekMode::Absolute), Err(FifoError::InvalidArgument)));
        assert_eq!(h.position(), 16, "failed seek keeps the cursor");

        assert_eq!(h.seek(0, SeekMode::Absolute).unwrap(), 0);
        assert!(matches!(h.seek(-1, SeekMode::Relative), Err(FifoError::InvalidArgument)));
        assert_eq!(h.seek(10, SeekMode::Relative).unwrap(), 10);
        assert_eq!(h.seek(-4, SeekMode::Relative).unwrap(), 6);
        assert!(matches!(h.seek(11, SeekMode::Relative), Err(FifoError::InvalidArgument)));
        assert!(matches!(h.seek(i64::MAX, SeekMode::Relative), Err(FifoError::InvalidArgument)));
        assert!(matches!(h.seek(0, SeekMode::End), Err(FifoError::InvalidArgument)));
        assert_eq!(h.position(), 6);
    }

    #[test]
    fn whence_codes() {
        assert_eq!(SeekMode::try_from(0).unwrap(), SeekMode::Absolute);
        assert_eq!(SeekMode::try_from(1).unwrap(), SeekMode::Relative);
        assert_eq!(SeekMode::try_from(2).unwrap(), SeekMode::End);
        assert!(matches!(SeekMode::try_from(7), Err(FifoError::InvalidArgument)));
    }

    #[test]
    fn cursor_does_not_steer_transfers() {
        let chan = BoundedChannel::with_capacity(8);
        let mut h = chan.open_with(OpenOptions::new().non_blocking(true));
        h.write(b"abcd").unwrap();
        h.seek(3, SeekMode::Absolute).unwrap();
        assert_eq!(h.read_to_vec(2).unwrap(), b"ab");
        h.seek(8, SeekMode::Absolute).unwrap();
        assert_eq!(h.write(b"ef").unwrap(), 2);
        assert_eq!(h.read_to_vec(8).unwrap(), b"cdef");
        assert_eq!(h.position(), 8);
    }

    #[test]
    fn handles_are_independent_sessions() {
        let chan = BoundedChannel::with_capacity(8);
        let mut a = chan.open_with(OpenOptions::new().non_blocking(true));
        let b = chan.open_with(OpenOptions::new().non_blocking(true));
        a.seek(5, SeekMode::Absolute).unwrap();
        assert_eq!(b.position(), 0);

        a.write(b"shared").unwrap();
        assert_eq!(b.read_to_vec(8).unwrap(), b"shared");
    }

    #[test]
    fn std_io_traits() {
        let chan = BoundedChannel::with_capacity(8);
        let mut h = chan.open_with(OpenOptions::new().non_blocking(true));

        Write::write_all(&mut h, b"12345").unwrap();
        h.flush().unwrap();

        let mut out = [0u8; 3];
        Read::read_exact(&mut h, &mut out).unwrap();
        assert_eq!(&out, b"123");

        let mut out = [0u8; 8];
        assert_eq!(Read::read(&mut h, &mut out).unwrap(), 2);
        let err = Read::read(&mut h, &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        assert_eq!(Seek::seek(&mut h, SeekFrom::Start(4)).unwrap(), 4);
        assert_eq!(Seek::seek(&mut h, SeekFrom::Current(-4)).unwrap(), 0);
        let err = Seek::seek(&mut h, SeekFrom::End(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        let err = Seek::seek(&mut h, SeekFrom::Start(u64::MAX)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn toggling_nonblocking() {
        let chan = BoundedChannel::with_capacity(1);
        let mut h = chan.open();
        assert!(!h.is_nonblocking());
        h.write(b"x").unwrap();
        h.set_nonblocking(true);
        assert!(matches!(h.write(b"y"), Err(FifoError::WouldBlock)));
    }

    #[test]
    fn write_all_stops_on_would_block() {
        let chan = BoundedChannel::with_capacity(4);
        let h = chan.open_with(OpenOptions::new().non_blocking(true));
        assert!(matches!(h.write_all(b"abcdef"), Err(FifoError::WouldBlock)));
        assert_eq!(chan.len(), 4);
    }
}
