//! Single-value hand-off between the capture thread and the turn thread.
//!
//! The producer never blocks. An utterance that arrives while the previous one
//! is still unconsumed replaces it, so the consumer always gets the newest turn.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct SlotState<T> {
    value: Option<T>,
    closed: bool,
    dropped: u64,
}

/// Overwriting one-slot mailbox.
#[derive(Debug)]
pub struct UtteranceSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Default for UtteranceSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UtteranceSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
                dropped: 0,
            }),
            ready: Condvar::new(),
        }
    }

    // A panic while holding the lock cannot leave the slot half-written, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value`, replacing any unconsumed one. Returns `true` if a value
    /// was dropped. Values put after `close` are discarded.
    pub fn put(&self, value: T) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let replaced = state.value.replace(value).is_some();
        if replaced {
            state.dropped += 1;
        }
        drop(state);
        self.ready.notify_one();
        replaced
    }

    /// Wait up to `timeout` for a value. `None` on timeout or once closed.
    pub fn take_blocking(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(value) = state.value.take() {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = match self.ready.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
    }

    /// Non-blocking take.
    pub fn try_take(&self) -> Option<T> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.value.take()
    }

    /// Wake the consumer and refuse further values. Any pending value is dropped.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.value = None;
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Values overwritten before they were taken.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}
