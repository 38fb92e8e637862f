//! Interpreter lock
//!
//! Embedded interpreters are not safe to enter from several threads at
//! once. Every native→embedded boundary crossing takes a
//! [`ScopedInterpreterLock`] from the runtime's [`InterpreterGate`];
//! embedded→native callbacks that may block release the lock around the
//! blocking section via [`ScopedInterpreterLock::unlocked`] and re-acquire
//! on return, so the interpreter is never held across blocking native
//! work. The gate is an explicit resource on the owning loader - there is
//! no implicit "current interpreter" global.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

const NO_OWNER: u64 = u64::MAX;

fn current_thread_token() -> u64 {
    // stable per-thread token; thread::current().id() is not convertible
    // to an integer on stable, so hand out our own
    use std::cell::Cell;
    static NEXT: AtomicU64 = AtomicU64::new(0);
    thread_local! {
        static TOKEN: Cell<u64> = const { Cell::new(NO_OWNER) };
    }
    TOKEN.with(|token| {
        if token.get() == NO_OWNER {
            token.set(NEXT.fetch_add(1, Ordering::Relaxed));
        }
        token.get()
    })
}

/// Re-entrant gate serializing access to an embedded interpreter
pub struct InterpreterGate {
    state: Mutex<()>,
    available: Condvar,
    owner: AtomicU64,
    depth: AtomicUsize,
}

impl InterpreterGate {
    /// Create an unlocked gate
    pub fn new() -> Self {
        InterpreterGate {
            state: Mutex::new(()),
            available: Condvar::new(),
            owner: AtomicU64::new(NO_OWNER),
            depth: AtomicUsize::new(0),
        }
    }

    /// Acquire the gate, blocking until it is free.
    ///
    /// Re-entrant: a thread already holding the gate may acquire it again.
    pub fn enter(&self) -> ScopedInterpreterLock<'_> {
        self.acquire();
        ScopedInterpreterLock { gate: self }
    }

    fn acquire(&self) {
        let me = current_thread_token();
        if self.owner.load(Ordering::Acquire) == me {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut guard = self.state.lock();
        while self.owner.load(Ordering::Acquire) != NO_OWNER {
            self.available.wait(&mut guard);
        }
        self.owner.store(me, Ordering::Release);
        self.depth.store(1, Ordering::Relaxed);
    }

    fn release(&self) {
        if self.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            let _guard = self.state.lock();
            self.owner.store(NO_OWNER, Ordering::Release);
            self.available.notify_one();
        }
    }

    /// Whether the calling thread currently holds the gate
    pub fn held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread_token()
    }
}

impl Default for InterpreterGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterpreterGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterGate")
            .field("locked", &(self.owner.load(Ordering::Relaxed) != NO_OWNER))
            .finish()
    }
}

/// RAII hold on an [`InterpreterGate`]
pub struct ScopedInterpreterLock<'a> {
    gate: &'a InterpreterGate,
}

impl ScopedInterpreterLock<'_> {
    /// Release the gate for the duration of `f` and re-acquire afterwards.
    ///
    /// Used by embedded→native callbacks before running blocking native
    /// code, so a second thread can enter the interpreter meanwhile. The
    /// calling thread must not touch interpreter state inside `f`.
    pub fn unlocked<R>(&self, f: impl FnOnce() -> R) -> R {
        // fully release this thread's hold (all nesting levels)
        let depth = self.gate.depth.swap(0, Ordering::Relaxed);
        {
            let _guard = self.gate.state.lock();
            self.gate.owner.store(NO_OWNER, Ordering::Release);
            self.gate.available.notify_one();
        }

        let result = f();

        // re-acquire and restore the nesting depth
        self.gate.acquire();
        self.gate.depth.store(depth, Ordering::Relaxed);
        result
    }
}

impl Drop for ScopedInterpreterLock<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reentrant_acquire() {
        let gate = InterpreterGate::new();
        let outer = gate.enter();
        assert!(gate.held_by_current_thread());
        {
            let _inner = gate.enter();
            assert!(gate.held_by_current_thread());
        }
        assert!(gate.held_by_current_thread());
        drop(outer);
        assert!(!gate.held_by_current_thread());
    }

    #[test]
    fn test_unlocked_releases_for_other_threads() {
        let gate = Arc::new(InterpreterGate::new());
        let lock = gate.enter();

        let other = gate.clone();
        lock.unlocked(move || {
            // another thread can take the gate while we are unlocked
            let handle = std::thread::spawn(move || {
                let _lock = other.enter();
            });
            handle.join().unwrap();
        });

        // re-acquired after the unlocked section
        assert!(gate.held_by_current_thread());
        drop(lock);
    }

    #[test]
    fn test_serializes_across_threads() {
        let gate = Arc::new(InterpreterGate::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let _lock = gate.enter();
                    let seen = counter.fetch_add(1, Ordering::SeqCst);
                    assert!(seen < 10_000);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 400);
    }
}
