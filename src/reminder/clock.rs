//! Time source and timer capability for the reminder scheduler.
//!
//! [`TokioClock`] runs on the wall clock; [`ManualClock`] only moves when told
//! to, which lets tests step through hours of reminders instantly.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Cancels one armed timer. Cancelling an elapsed timer is a no-op.
pub trait TimerHandle: Send {
    fn cancel(&self);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Run `callback` once after `delay`, unless cancelled first.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Box<dyn TimerHandle>;
}

/// Wall-clock timers, one tokio task per armed reminder.
#[derive(Clone)]
pub struct TokioClock {
    runtime: tokio::runtime::Handle,
}

impl TokioClock {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }

    /// Bind to the runtime of the calling context.
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|_| Error::NoRuntime)
    }
}

struct TokioTimer(tokio::task::AbortHandle);

impl TimerHandle for TokioTimer {
    fn cancel(&self) {
        self.0.abort();
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Box<dyn TimerHandle> {
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        Box::new(TokioTimer(task.abort_handle()))
    }
}

/// Virtual clock. Time stands still until [`advance`](Self::advance) is called.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualInner>>,
}

struct ManualInner {
    now: DateTime<Utc>,
    next_seq: u64,
    // Keyed by (fire instant, arm order) so equal instants fire in arm order.
    pending: BTreeMap<(DateTime<Utc>, u64), TimerCallback>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualInner {
                now: start,
                next_seq: 0,
                pending: BTreeMap::new(),
            })),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let target = self.now() + by;
        self.advance_to(target);
    }

    /// Move time forward, firing every timer due on the way in fire-time order.
    ///
    /// Callbacks run with the clock unlocked, so they may arm or cancel timers.
    pub fn advance_to(&self, target: DateTime<Utc>) {
        loop {
            let callback = {
                let mut inner = self.lock();
                let Some(entry) = inner.pending.first_entry() else {
                    break;
                };
                if entry.key().0 > target {
                    break;
                }
                let ((at, _), callback) = entry.remove_entry();
                if at > inner.now {
                    inner.now = at;
                }
                callback
            };
            callback();
        }
        let mut inner = self.lock();
        if target > inner.now {
            inner.now = target;
        }
    }

    /// Number of armed, not yet fired timers.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ManualTimer {
    inner: Arc<Mutex<ManualInner>>,
    key: (DateTime<Utc>, u64),
}

impl TimerHandle for ManualTimer {
    fn cancel(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.pending.remove(&self.key);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Box<dyn TimerHandle> {
        let mut inner = self.lock();
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let at = inner.now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let key = (at, inner.next_seq);
        inner.next_seq += 1;
        inner.pending.insert(key, callback);
        Box::new(ManualTimer {
            inner: self.inner.clone(),
            key,
        })
    }
}
