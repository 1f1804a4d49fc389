//! Cooperative cancellation for blocked reads and writes.
//!
//! An [`Interrupt`] is attached to a handle. While a transfer on that handle
//! sleeps, the token remembers which channel it is sleeping on, so that
//! [`Interrupt::raise`] can wake it. The sleeper then observes the raised
//! flag under the channel lock and returns `Interrupted` without touching
//! the buffer.
//!
//! # Lost wakeups
//!
//! A sleeper registers itself and checks the flag while holding the channel
//! lock. `raise` stores the flag *before* taking its snapshot of registered
//! channels, then takes each channel lock before notifying. Either the
//! snapshot misses the sleeper, in which case the sleeper's check happens
//! after the store and sees it, or the snapshot includes it, in which case
//! the notify cannot run until the sleeper is parked on the condvar.

use crate::channel::Shared;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Cancellation token shared between a blocked caller and whoever wants to
/// stop it. Clones refer to the same token.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    raised: AtomicBool,
    next_id: AtomicU64,
    watchers: Mutex<Vec<Watcher>>,
}

struct Watcher {
    id: u64,
    channel: Weak<Shared>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the token and wakes every wait currently parked under it.
    ///
    /// The token stays raised until [`reset`](Self::reset); any blocking wait
    /// started meanwhile fails immediately.
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);

        let channels: Vec<Arc<Shared>> = self
            .inner
            .watchers
            .lock()
            .iter()
            .filter_map(|w| w.channel.upgrade())
            .collect();

        for channel in channels {
            channel.wake_all();
        }
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Clears the raised flag so the handle can block again.
    pub fn reset(&self) {
        self.inner.raised.store(false, Ordering::SeqCst);
    }

    /// Registers `channel` as something to wake on `raise` for as long as
    /// the returned guard lives.
    pub(crate) fn watch(&self, channel: &Arc<Shared>) -> WatchGuard<'_> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.watchers.lock().push(Watcher {
            id,
            channel: Arc::downgrade(channel),
        });
        WatchGuard { interrupt: self, id }
    }

    #[cfg(test)]
    fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().len()
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish()
    }
}

pub(crate) struct WatchGuard<'a> {
    interrupt: &'a Interrupt,
    id: u64,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        let id = self.id;
        self.interrupt
            .inner
            .watchers
            .lock()
            .retain(|w| w.id != id);
    }
}
