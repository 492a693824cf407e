//! A fair-ish reader/writer latch (spec §4.1).
//!
//! This is the only synchronisation primitive used by nodes, caches, and
//! queues in this crate. It is deliberately a hand-rolled state machine
//! rather than a bare `parking_lot::RwLock`, since callers need two
//! operations a plain `RwLock` does not give us directly: a non-blocking
//! `try_upgrade` (shared → exclusive) and a `Condition` object that releases
//! the latch while a thread waits and re-acquires it exclusively on resume.
//! `parking_lot::{Mutex, Condvar}` provide the primitives this is built on.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct State {
    /// Number of threads currently holding the latch shared.
    readers: u32,
    /// Whether a single thread holds the latch exclusively.
    writer: bool,
    /// Number of threads blocked wanting the latch exclusively. While this
    /// is nonzero, new shared acquirers block too (fairness policy from
    /// spec §4.1: "pending exclusive acquirers block new shared acquirers").
    pending_exclusive: u32,
}

pub struct Latch {
    state: Mutex<State>,
    cond: Condvar,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        Latch {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }

    pub fn acquire_shared(&self) {
        let mut s = self.state.lock();
        while s.writer || s.pending_exclusive > 0 {
            self.cond.wait(&mut s);
        }
        s.readers += 1;
    }

    pub fn try_acquire_shared(&self) -> bool {
        let mut s = self.state.lock();
        if s.writer || s.pending_exclusive > 0 {
            return false;
        }
        s.readers += 1;
        true
    }

    pub fn acquire_exclusive(&self) {
        let mut s = self.state.lock();
        s.pending_exclusive += 1;
        while s.writer || s.readers > 0 {
            self.cond.wait(&mut s);
        }
        s.pending_exclusive -= 1;
        s.writer = true;
    }

    pub fn try_acquire_exclusive(&self) -> bool {
        let mut s = self.state.lock();
        if s.writer || s.readers > 0 {
            return false;
        }
        s.writer = true;
        true
    }

    /// Blocking exclusive acquire with a timeout; returns `false` on
    /// timeout rather than blocking forever (used by the rebalance path,
    /// which only ever uses `try_*`, but is also handy for cursor retry
    /// loops that want a bounded wait rather than a spin).
    pub fn acquire_exclusive_timeout(&self, timeout: Duration) -> bool {
        let mut s = self.state.lock();
        s.pending_exclusive += 1;
        let deadline = Instant::now() + timeout;
        let mut ok = true;
        while s.writer || s.readers > 0 {
            let now = Instant::now();
            if now >= deadline {
                ok = false;
                break;
            }
            let timed_out = self.cond.wait_for(&mut s, deadline - now).timed_out();
            if timed_out {
                ok = (!s.writer) && s.readers == 0;
                break;
            }
        }
        s.pending_exclusive -= 1;
        if ok {
            s.writer = true;
        }
        ok
    }

    /// Exclusive → shared, never fails.
    pub fn downgrade(&self) {
        let mut s = self.state.lock();
        debug_assert!(s.writer);
        s.writer = false;
        s.readers += 1;
        self.cond.notify_all();
    }

    /// Shared → exclusive, non-blocking. Only succeeds if this is the sole
    /// reader; illegal shared→exclusive upgrade attempts (multiple readers)
    /// must go through the lock manager instead, never through the latch,
    /// since blocking here could deadlock against another reader doing the
    /// same thing.
    pub fn try_upgrade(&self) -> bool {
        let mut s = self.state.lock();
        if s.writer || s.readers != 1 {
            return false;
        }
        s.readers = 0;
        s.writer = true;
        true
    }

    pub fn release_shared(&self) {
        let mut s = self.state.lock();
        debug_assert!(s.readers > 0);
        s.readers -= 1;
        if s.readers == 0 {
            self.cond.notify_all();
        }
    }

    pub fn release_exclusive(&self) {
        let mut s = self.state.lock();
        debug_assert!(s.writer);
        s.writer = false;
        self.cond.notify_all();
    }

    pub fn is_exclusively_held(&self) -> bool {
        self.state.lock().writer
    }

    /// A condition bound to this latch: `wait` releases the latch's
    /// exclusive hold while blocked and re-acquires it on resume, mirroring
    /// spec §4.1's `Condition::await(nanos)` / `signal()`.
    pub fn condition(&self) -> Condition<'_> {
        Condition { latch: self }
    }
}

pub struct Condition<'a> {
    latch: &'a Latch,
}

impl<'a> Condition<'a> {
    /// Caller must already hold the exclusive latch. Releases it, waits up
    /// to `timeout`, then re-acquires exclusive before returning. Returns
    /// `true` if woken by `signal`, `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut s = self.latch.state.lock();
        debug_assert!(s.writer);
        s.writer = false;
        self.latch.cond.notify_all();
        let res = self.latch.cond.wait_for(&mut s, timeout);
        // Always re-acquire exclusive before returning, per this method's own contract.
        while s.writer || s.readers > 0 {
            self.latch.cond.wait(&mut s);
        }
        s.writer = true;
        !res.timed_out()
    }

    pub fn signal(&self) {
        self.latch.cond.notify_all();
    }
}

/// RAII guard releasing a shared hold on drop, so an early `?` return always
/// gives the latch back (spec §7 propagation policy).
pub struct SharedGuard<'a> {
    latch: &'a Latch,
}

impl<'a> SharedGuard<'a> {
    pub fn acquire(latch: &'a Latch) -> Self {
        latch.acquire_shared();
        SharedGuard { latch }
    }

    pub fn try_acquire(latch: &'a Latch) -> Option<Self> {
        if latch.try_acquire_shared() {
            Some(SharedGuard { latch })
        } else {
            None
        }
    }
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        self.latch.release_shared();
    }
}

/// RAII guard releasing an exclusive hold on drop.
pub struct ExclusiveGuard<'a> {
    latch: &'a Latch,
}

impl<'a> ExclusiveGuard<'a> {
    pub fn acquire(latch: &'a Latch) -> Self {
        latch.acquire_exclusive();
        ExclusiveGuard { latch }
    }

    pub fn try_acquire(latch: &'a Latch) -> Option<Self> {
        if latch.try_acquire_exclusive() {
            Some(ExclusiveGuard { latch })
        } else {
            None
        }
    }

    pub fn downgrade(self) -> SharedGuard<'a> {
        self.latch.downgrade();
        let latch = self.latch;
        std::mem::forget(self);
        SharedGuard { latch }
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.latch.release_exclusive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn shared_readers_do_not_block_each_other() {
        let latch = Arc::new(Latch::new());
        let g1 = SharedGuard::acquire(&latch);
        assert!(latch.try_acquire_shared());
        drop(g1);
    }

    #[test]
    fn exclusive_excludes_everyone() {
        let latch = Latch::new();
        let _g = ExclusiveGuard::acquire(&latch);
        assert!(!latch.try_acquire_shared());
        assert!(!latch.try_acquire_exclusive());
    }

    #[test]
    fn try_upgrade_succeeds_when_sole_reader() {
        let latch = Latch::new();
        latch.acquire_shared();
        assert!(latch.try_upgrade());
        latch.release_exclusive();
    }

    #[test]
    fn try_upgrade_fails_with_multiple_readers() {
        let latch = Latch::new();
        latch.acquire_shared();
        latch.acquire_shared();
        assert!(!latch.try_upgrade());
        latch.release_shared();
        latch.release_shared();
    }

    #[test]
    fn pending_exclusive_blocks_new_readers() {
        let latch = Arc::new(Latch::new());
        latch.acquire_shared();
        let latch2 = latch.clone();
        let handle = thread::spawn(move || {
            latch2.acquire_exclusive();
            latch2.release_exclusive();
        });
        // give the writer a moment to register as pending
        thread::sleep(Duration::from_millis(50));
        assert!(!latch.try_acquire_shared());
        latch.release_shared();
        handle.join().unwrap();
    }
}
