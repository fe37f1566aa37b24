//! One-shot timeout timers.
//!
//! The timer is an injected capability: targets without a usable timer
//! simply construct the completion state without one, and every timer
//! operation degrades to a no-op. [`ThreadTimer`] is the portable default,
//! parking a watcher thread until the deadline or cancellation.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Cancellable handle to a scheduled one-shot timer.
pub trait TimerHandle: Send {
    /// Cancel the timer.
    ///
    /// Best effort: the callback may already be running. Safe to call more
    /// than once.
    fn cancel(&self);
}

/// Facility that schedules one-shot timers.
pub trait TimerFacility: Send + Sync {
    /// Schedule `callback` to run once after `delay`.
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> Box<dyn TimerHandle>;
}

/// Timer facility that parks a watcher thread per scheduled timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadTimer;

struct ThreadTimerState {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

struct ThreadTimerHandle {
    state: Arc<ThreadTimerState>,
}

impl TimerHandle for ThreadTimerHandle {
    fn cancel(&self) {
        *self.state.cancelled.lock().unwrap() = true;
        self.state.wakeup.notify_all();
    }
}

impl TimerFacility for ThreadTimer {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> Box<dyn TimerHandle> {
        let state = Arc::new(ThreadTimerState {
            cancelled: Mutex::new(false),
            wakeup: Condvar::new(),
        });
        let watcher_state = state.clone();
        thread::Builder::new()
            .name("ebbtide-timer".into())
            .spawn(move || {
                let deadline = Instant::now() + delay;
                let mut cancelled = watcher_state.cancelled.lock().unwrap();
                loop {
                    if *cancelled {
                        return;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = watcher_state
                        .wakeup
                        .wait_timeout(cancelled, deadline - now)
                        .unwrap();
                    cancelled = guard;
                }
                drop(cancelled);
                callback();
            })
            .expect("failed to spawn timer thread");
        Box::new(ThreadTimerHandle { state })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn fires_after_the_delay() {
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        let _handle = ThreadTimer.schedule(
            Duration::from_millis(20),
            Box::new(move || tx.send(()).unwrap()),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = ThreadTimer.schedule(
            Duration::from_millis(50),
            Box::new(move || tx.send(()).unwrap()),
        );
        handle.cancel();
        handle.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
