// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! OS-style completion events.
//!
//! A manual-reset event stays signaled until `reset` is called; an
//! auto-reset event releases exactly one waiter per `set` and rearms itself.
//! Fence completion notifications use the manual flavor, pump-thread kicks
//! use the auto flavor.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub struct Event {
    signaled: Mutex<bool>,
    condvar: Condvar,
    manual_reset: bool,
}

impl Event {
    /// A manual-reset event, initially unsignaled.
    pub fn manual_reset() -> Self {
        Self {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
            manual_reset: true,
        }
    }

    /// An auto-reset event, initially unsignaled.
    pub fn auto_reset() -> Self {
        Self {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
            manual_reset: false,
        }
    }

    /// Signal the event, waking all current waiters.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_all();
    }

    /// Return the event to the unsignaled state.
    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    /// Non-blocking poll. Does not consume an auto-reset signal.
    pub fn ready(&self) -> bool {
        *self.signaled.lock()
    }

    /// Block until the event is signaled. Consumes the signal if auto-reset.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.condvar.wait(&mut signaled);
        }
        if !self.manual_reset {
            *signaled = false;
        }
    }

    /// Block until the event is signaled or `timeout` elapses.
    /// `None` waits forever. Returns `true` if the event was signaled.
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> bool {
        let Some(timeout) = timeout else {
            self.wait();
            return true;
        };

        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.condvar.wait_until(&mut signaled, deadline).timed_out() {
                return false;
            }
        }
        if !self.manual_reset {
            *signaled = false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_manual_reset_stays_signaled() {
        let event = Event::manual_reset();
        assert!(!event.ready());
        event.set();
        event.wait();
        assert!(event.ready());
        event.reset();
        assert!(!event.ready());
    }

    #[test]
    fn test_auto_reset_consumes_signal() {
        let event = Event::auto_reset();
        event.set();
        event.wait();
        assert!(!event.ready());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let event = Event::auto_reset();
        let start = Instant::now();
        assert!(!event.wait_timeout(Some(Duration::from_millis(50))));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_cross_thread_wake() {
        let event = Arc::new(Event::manual_reset());
        let event2 = event.clone();

        let handle = thread::spawn(move || {
            event2.wait();
        });

        thread::sleep(Duration::from_millis(20));
        event.set();
        handle.join().unwrap();
    }
}
