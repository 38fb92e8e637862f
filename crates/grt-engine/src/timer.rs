//! Periodic callback thread
//!
//! [`TimerActionThread`] runs one callback on a dedicated OS thread at a
//! fixed interval, for background polling such as UI auto-refresh ticks.
//! The callback slot sits behind a mutex and can be swapped while the
//! thread runs. This is deliberately not a general concurrency primitive;
//! the rest of the runtime stays single-threaded.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

type TimerAction = Box<dyn FnMut() + Send>;

struct Shared {
    action: Mutex<Option<TimerAction>>,
    stop: Mutex<bool>,
    wake: Condvar,
}

/// A thread invoking an action at a fixed interval until stopped
pub struct TimerActionThread {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl TimerActionThread {
    /// Spawn the timer thread.
    ///
    /// The first invocation happens one `interval` after the spawn.
    pub fn new(action: impl FnMut() + Send + 'static, interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            action: Mutex::new(Some(Box::new(action) as TimerAction)),
            stop: Mutex::new(false),
            wake: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("grt-timer".to_string())
            .spawn(move || loop {
                {
                    let mut stop = thread_shared.stop.lock();
                    if !*stop {
                        let _ = thread_shared.wake.wait_for(&mut stop, interval);
                    }
                    if *stop {
                        break;
                    }
                }
                if let Some(action) = thread_shared.action.lock().as_mut() {
                    action();
                }
            })
            .expect("failed to spawn timer thread");

        TimerActionThread {
            shared,
            handle: Some(handle),
        }
    }

    /// Replace the action invoked on each tick
    pub fn set_action(&self, action: impl FnMut() + Send + 'static) {
        *self.shared.action.lock() = Some(Box::new(action));
    }

    /// Silence the timer without stopping the thread
    pub fn clear_action(&self) {
        *self.shared.action.lock() = None;
    }

    /// Stop the thread and wait for it to finish
    pub fn stop(&mut self) {
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerActionThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TimerActionThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerActionThread")
            .field("running", &self.handle.is_some())
            .finish()
    }
}
