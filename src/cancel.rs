//! Cross-thread cancellation for a running session.
//!
//! A [`CancelToken`] is created per session and cloned into the controlling
//! thread and the reactor thread. Cancelling clears the shared running flag
//! under the mutex, signals the condition variable so timed waits return at
//! once, then runs any registered wakers (eventfd write, XRecord disable).

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

type Waker = Box<dyn Fn() + Send + Sync>;

struct Flag {
    running: bool,
}

struct Inner {
    flag: Mutex<Flag>,
    cond: Condvar,
    wakers: Mutex<Vec<Waker>>,
}

/// Shared stop signal for one session.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a token in the running state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: Mutex::new(Flag { running: true }),
                cond: Condvar::new(),
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    fn flag(&self) -> MutexGuard<'_, Flag> {
        self.inner
            .flag
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the session should keep running.
    pub fn is_running(&self) -> bool {
        self.flag().running
    }

    /// Clear the running flag and wake every waiter.
    ///
    /// Returns `false` if the token was already cancelled; wakers only run once.
    pub fn cancel(&self) -> bool {
        {
            let mut flag = self.flag();
            if !flag.running {
                return false;
            }
            flag.running = false;
            self.inner.cond.notify_all();
        }

        let wakers = self
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for wake in wakers.iter() {
            wake();
        }
        true
    }

    /// Register a callback to run when the token is cancelled.
    ///
    /// If the token is already cancelled the callback runs immediately.
    pub fn on_cancel<F>(&self, wake: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut wakers = self
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_running() {
            wakers.push(Box::new(wake));
        } else {
            drop(wakers);
            wake();
        }
    }

    /// Drop all registered wakers. Called at session teardown so wakers never
    /// outlive the resources they poke.
    pub fn clear_wakers(&self) {
        self.inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Block for at most `timeout`, returning early if cancelled.
    ///
    /// Returns whether the session is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag();
        while flag.running {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            flag = self
                .inner
                .cond
                .wait_timeout(flag, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        flag.running
    }
}
