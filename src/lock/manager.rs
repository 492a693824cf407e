//! The central lock table (spec §4.6): per-key lock state, the transition
//! rules between Shared / Upgradable / Exclusive, and deadlock detection via
//! the wait-for graph before a thread ever blocks.
//!
//! Transition rules:
//!
//! | requested   | blocked by                                             |
//! |-------------|---------------------------------------------------------|
//! | Shared      | an exclusive holder that isn't the requester            |
//! | Upgradable  | an upgradable holder that isn't the requester, or any exclusive holder that isn't the requester |
//! | Exclusive   | any shared holder other than the requester, any upgradable holder other than the requester, or an exclusive holder that isn't the requester |
//!
//! A requester already holding a weaker mode on the same key transitions in
//! place (Shared -> Upgradable -> Exclusive) rather than queuing behind
//! itself.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{EngineError, LockFailureKind, Result};
use crate::lock::graph::WaitForGraph;
use crate::lock::locker::{LockKey, LockMode};
use crate::types::{TreeId, TxnId};

#[derive(Default, Clone)]
struct LockState {
    shared: Vec<TxnId>,
    upgradable: Option<TxnId>,
    exclusive: Option<TxnId>,
}

impl LockState {
    fn blocking_holder_for_shared(&self, me: TxnId) -> Option<TxnId> {
        self.exclusive.filter(|&h| h != me)
    }

    fn blocking_holder_for_upgradable(&self, me: TxnId) -> Option<TxnId> {
        self.upgradable
            .filter(|&h| h != me)
            .or_else(|| self.exclusive.filter(|&h| h != me))
    }

    fn blocking_holder_for_exclusive(&self, me: TxnId) -> Option<TxnId> {
        self.exclusive
            .filter(|&h| h != me)
            .or_else(|| self.upgradable.filter(|&h| h != me))
            .or_else(|| self.shared.iter().copied().find(|&h| h != me))
    }

    fn grant_shared(&mut self, me: TxnId) {
        if !self.shared.contains(&me) {
            self.shared.push(me);
        }
    }

    fn grant_upgradable(&mut self, me: TxnId) {
        self.upgradable = Some(me);
    }

    fn grant_exclusive(&mut self, me: TxnId) {
        self.exclusive = Some(me);
        self.shared.retain(|&h| h != me);
        if self.upgradable == Some(me) {
            self.upgradable = None;
        }
    }

    fn release(&mut self, me: TxnId, mode: LockMode) {
        match mode {
            LockMode::Shared => self.shared.retain(|&h| h != me),
            LockMode::Upgradable => {
                if self.upgradable == Some(me) {
                    self.upgradable = None;
                }
            }
            LockMode::Exclusive => {
                if self.exclusive == Some(me) {
                    self.exclusive = None;
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.upgradable.is_none() && self.exclusive.is_none()
    }
}

struct Shared {
    locks: HashMap<LockKey, LockState>,
    graph: WaitForGraph,
}

pub struct LockManager {
    state: Mutex<Shared>,
    cond: Condvar,
    default_timeout: Duration,
}

impl LockManager {
    pub fn new(default_timeout: Duration) -> Self {
        LockManager {
            state: Mutex::new(Shared {
                locks: HashMap::new(),
                graph: WaitForGraph::new(),
            }),
            cond: Condvar::new(),
            default_timeout,
        }
    }

    pub fn try_lock_shared(&self, txn: TxnId, index_id: TreeId, key: &[u8]) -> Result<()> {
        self.acquire(txn, index_id, key, LockMode::Shared, self.default_timeout)
    }

    pub fn try_lock_upgradable(&self, txn: TxnId, index_id: TreeId, key: &[u8]) -> Result<()> {
        self.acquire(txn, index_id, key, LockMode::Upgradable, self.default_timeout)
    }

    pub fn try_lock_exclusive(&self, txn: TxnId, index_id: TreeId, key: &[u8]) -> Result<()> {
        self.acquire(txn, index_id, key, LockMode::Exclusive, self.default_timeout)
    }

    pub fn lock_with_timeout(
        &self,
        txn: TxnId,
        index_id: TreeId,
        key: &[u8],
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        self.acquire(txn, index_id, key, mode, timeout)
    }

    fn acquire(
        &self,
        txn: TxnId,
        index_id: TreeId,
        key: &[u8],
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        let lock_key = LockKey {
            index_id,
            key: key.to_vec(),
        };
        let deadline = Instant::now() + timeout;
        let mut s = self.state.lock();

        if mode == LockMode::Exclusive {
            if let Some(entry) = s.locks.get(&lock_key) {
                let holds_shared_only =
                    entry.shared.contains(&txn) && entry.upgradable != Some(txn) && entry.exclusive != Some(txn);
                if holds_shared_only {
                    return Err(EngineError::lock_failure(LockFailureKind::IllegalUpgrade, index_id, key));
                }
            }
        }

        loop {
            let entry = s.locks.entry(lock_key.clone()).or_default();
            let blocker = match mode {
                LockMode::Shared => entry.blocking_holder_for_shared(txn),
                LockMode::Upgradable => entry.blocking_holder_for_upgradable(txn),
                LockMode::Exclusive => entry.blocking_holder_for_exclusive(txn),
            };

            let Some(blocker) = blocker else {
                match mode {
                    LockMode::Shared => entry.grant_shared(txn),
                    LockMode::Upgradable => entry.grant_upgradable(txn),
                    LockMode::Exclusive => entry.grant_exclusive(txn),
                }
                s.graph.remove_txn(txn);
                return Ok(());
            };

            if s.graph.would_cycle(txn, blocker) {
                return Err(EngineError::lock_failure(LockFailureKind::Deadlock, index_id, key));
            }
            s.graph.add_edge(txn, blocker);

            let now = Instant::now();
            if now >= deadline {
                s.graph.remove_edge(txn, blocker);
                return Err(EngineError::lock_failure(LockFailureKind::TimedOut, index_id, key));
            }
            let result = self.cond.wait_for(&mut s, deadline - now);
            s.graph.remove_edge(txn, blocker);
            if result.timed_out() {
                return Err(EngineError::lock_failure(LockFailureKind::TimedOut, index_id, key));
            }
        }
    }

    pub fn release(&self, txn: TxnId, index_id: TreeId, key: &[u8], mode: LockMode) {
        let lock_key = LockKey {
            index_id,
            key: key.to_vec(),
        };
        let mut s = self.state.lock();
        let empty = if let Some(entry) = s.locks.get_mut(&lock_key) {
            entry.release(txn, mode);
            entry.is_empty()
        } else {
            false
        };
        if empty {
            s.locks.remove(&lock_key);
        }
        s.graph.remove_txn(txn);
        self.cond.notify_all();
    }
}
