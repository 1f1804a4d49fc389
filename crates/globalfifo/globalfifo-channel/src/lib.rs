//! A fixed-capacity, blocking FIFO byte channel.
//!
//! One [`BoundedChannel`] owns a byte buffer shared by every session opened
//! on it. Sessions are [`ChannelHandle`]s: they read from the front and write
//! to the back of the queue, blocking (or failing with `WouldBlock`) when the
//! channel is empty or full. Blocked calls can be cancelled through an
//! [`Interrupt`] or bounded by a timeout.

mod buffer;
mod channel;
mod error;
mod handle;
mod interrupt;

pub use buffer::{DEFAULT_CAPACITY, FillLevel};
pub use channel::{BoundedChannel, ChannelConfig, ChannelStats, ControlCommand, MEM_CLEAR};
pub use error::{FifoError, Result};
pub use handle::{ChannelHandle, OpenOptions, SeekMode};
pub use interrupt::Interrupt;
