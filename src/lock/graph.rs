//! Wait-for graph cycle detection (spec §4.6 deadlock detection).
//!
//! Same DFS-with-recursion-stack shape the transaction layer's own
//! `wait_for_graph` used for ARIES-style lock waits, generalised from
//! `TransactionID` to the engine's own `TxnId` newtype.

use std::collections::{HashMap, HashSet};

use crate::types::TxnId;

#[derive(Default)]
pub struct WaitForGraph {
    graph: HashMap<TxnId, HashSet<TxnId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        WaitForGraph::default()
    }

    pub fn add_edge(&mut self, from: TxnId, to: TxnId) {
        self.graph.entry(from).or_insert_with(HashSet::new).insert(to);
    }

    pub fn remove_edge(&mut self, from: TxnId, to: TxnId) {
        if let Some(waiting) = self.graph.get_mut(&from) {
            waiting.remove(&to);
        }
    }

    pub fn remove_txn(&mut self, tid: TxnId) {
        self.graph.remove(&tid);
        for waiting in self.graph.values_mut() {
            waiting.remove(&tid);
        }
    }

    /// True if adding an edge `from -> to` would close a cycle, i.e. `to`
    /// can already reach `from`. Callers use this to detect deadlock at the
    /// moment a new wait edge would be added, before actually adding it.
    pub fn would_cycle(&self, from: TxnId, to: TxnId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        self.can_reach(to, from, &mut visited)
    }

    fn can_reach(&self, start: TxnId, target: TxnId, visited: &mut HashSet<TxnId>) -> bool {
        if start == target {
            return true;
        }
        if !visited.insert(start) {
            return false;
        }
        if let Some(waiting) = self.graph.get(&start) {
            for &next in waiting {
                if self.can_reach(next, target, visited) {
                    return true;
                }
            }
        }
        false
    }

    pub fn exists_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        for &tid in self.graph.keys() {
            if self.is_cyclic(tid, &mut visited, &mut rec_stack) {
                return true;
            }
        }
        false
    }

    fn is_cyclic(&self, tid: TxnId, visited: &mut HashSet<TxnId>, rec_stack: &mut HashSet<TxnId>) -> bool {
        if !visited.contains(&tid) {
            visited.insert(tid);
            rec_stack.insert(tid);
            if let Some(waiting) = self.graph.get(&tid) {
                for &next in waiting {
                    if !visited.contains(&next) && self.is_cyclic(next, visited, rec_stack) {
                        return true;
                    } else if rec_stack.contains(&next) {
                        return true;
                    }
                }
            }
        }
        rec_stack.remove(&tid);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_a_simple_cycle() {
        let mut g = WaitForGraph::new();
        g.add_edge(TxnId(1), TxnId(2));
        g.add_edge(TxnId(2), TxnId(3));
        assert!(!g.exists_cycle());
        g.add_edge(TxnId(3), TxnId(1));
        assert!(g.exists_cycle());
    }

    #[test]
    fn would_cycle_predicts_before_mutating() {
        let mut g = WaitForGraph::new();
        g.add_edge(TxnId(1), TxnId(2));
        g.add_edge(TxnId(2), TxnId(3));
        assert!(g.would_cycle(TxnId(3), TxnId(1)));
        assert!(!g.would_cycle(TxnId(3), TxnId(4)));
    }

    #[test]
    fn remove_txn_drops_incoming_and_outgoing_edges() {
        let mut g = WaitForGraph::new();
        g.add_edge(TxnId(1), TxnId(2));
        g.add_edge(TxnId(2), TxnId(3));
        g.remove_txn(TxnId(2));
        assert!(!g.would_cycle(TxnId(3), TxnId(1)));
    }
}
