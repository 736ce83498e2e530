use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::error;

/// Cooperative cancellation token shared between a controller and the loops
/// it spawned. Waiting on it doubles as an interruptible sleep.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock() = true;
        condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps for up to `timeout`; returns true if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut triggered = flag.lock();
        while !*triggered {
            if condvar.wait_until(&mut triggered, deadline).timed_out() {
                break;
            }
        }
        *triggered
    }
}

/// Joins `handle` if it finishes within `timeout`. A thread that is still
/// running afterwards is logged and detached.
pub fn join_with_timeout(name: &str, handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            error!(thread = name, "Thread did not terminate within {:?}", timeout);
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        error!(thread = name, "Thread panicked before shutdown");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_returns_early_when_triggered() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });

        let started = Instant::now();
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(2));
        waker.join().unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.is_triggered());
    }

    #[test]
    fn test_join_with_timeout_detaches_stuck_thread() {
        let signal = ShutdownSignal::new();
        let stuck = signal.clone();
        let handle = std::thread::spawn(move || {
            stuck.wait_timeout(Duration::from_secs(2));
        });
        assert!(!join_with_timeout("stuck", handle, Duration::from_millis(20)));
        signal.trigger();

        let quick = std::thread::spawn(|| {});
        assert!(join_with_timeout("quick", quick, Duration::from_secs(1)));
    }
}
