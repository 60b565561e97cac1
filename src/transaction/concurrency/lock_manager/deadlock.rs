use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::{LockManager, LockRequestQueue};
use crate::transaction::concurrency::transaction::TransactionState;
use crate::transaction::concurrency::transaction_manager::TransactionManager;

type WaitForGraph = BTreeMap<TxnId, BTreeSet<TxnId>>;

impl LockManager {
    /// Start the background detector. Each tick rebuilds the wait-for graph
    /// from the live lock queues and aborts the youngest transaction on
    /// every cycle found.
    pub fn start_cycle_detection(self: &Arc<Self>, registry: Arc<TransactionManager>) {
        let mut handle = self.detector_handle.lock();
        if handle.is_some() {
            return;
        }
        self.enable_cycle_detection.store(true, Ordering::SeqCst);

        let lock_manager = Arc::clone(self);
        *handle = Some(
            std::thread::Builder::new()
                .name("cycle-detection".into())
                .spawn(move || {
                    while lock_manager.enable_cycle_detection.load(Ordering::SeqCst) {
                        std::thread::sleep(lock_manager.deadlock_interval);
                        if !lock_manager.enable_cycle_detection.load(Ordering::SeqCst) {
                            break;
                        }
                        lock_manager.detect_once(&registry);
                    }
                })
                .expect("failed to spawn the cycle detection thread"),
        );
    }

    /// Clear the enable flag and join the detector thread.
    pub fn stop_cycle_detection(&self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// One detector tick: rebuild the graph, then abort victims until no
    /// cycle remains. Returns the victims, youngest-first per cycle.
    pub fn detect_once(&self, registry: &TransactionManager) -> Vec<TxnId> {
        let mut graph = self.build_wait_for_graph();
        *self.waits_for.lock() = graph.clone();

        let mut victims = Vec::new();
        while let Some(cycle) = find_cycle(&graph) {
            let victim = *cycle.iter().max().expect("cycle cannot be empty");
            log::warn!("deadlock cycle {cycle:?}, aborting youngest txn {victim}");

            if let Some(txn) = registry.transaction(victim) {
                txn.set_state(TransactionState::Aborted);
            }
            self.notify_queues_holding(victim);

            graph.remove(&victim);
            for edges in graph.values_mut() {
                edges.remove(&victim);
            }
            graph.retain(|_, edges| !edges.is_empty());
            victims.push(victim);
        }
        victims
    }

    /// Current wait-for edges, sorted, for introspection and tests.
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let graph = self.build_wait_for_graph();
        let mut edges = Vec::new();
        for (&waiter, holders) in &graph {
            for &holder in holders {
                edges.push((waiter, holder));
            }
        }
        edges
    }

    /// Every ungranted request waits for every granted request in the same
    /// queue; collect those edges across both lock maps.
    fn build_wait_for_graph(&self) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        {
            let table_map = self.table_lock_map.lock();
            for queue in table_map.values() {
                add_queue_edges(queue, &mut graph);
            }
        }
        {
            let row_map = self.row_lock_map.lock();
            for queue in row_map.values() {
                add_queue_edges(queue, &mut graph);
            }
        }
        graph
    }

    /// Wake every queue in which the victim has a request so its waiting
    /// acquire observes the aborted state and unwinds.
    fn notify_queues_holding(&self, victim: TxnId) {
        let queues: Vec<Arc<LockRequestQueue>> = {
            let table_map = self.table_lock_map.lock();
            table_map.values().cloned().collect()
        };
        for queue in queues {
            let state = queue.state.lock();
            if state.requests.iter().any(|r| r.txn_id == victim) {
                queue.cv.notify_all();
            }
        }

        let queues: Vec<Arc<LockRequestQueue>> = {
            let row_map = self.row_lock_map.lock();
            row_map.values().cloned().collect()
        };
        for queue in queues {
            let state = queue.state.lock();
            if state.requests.iter().any(|r| r.txn_id == victim) {
                queue.cv.notify_all();
            }
        }
    }
}

fn add_queue_edges(queue: &Arc<LockRequestQueue>, graph: &mut WaitForGraph) {
    let state = queue.state.lock();
    let granted: Vec<TxnId> = state
        .requests
        .iter()
        .filter(|r| r.granted)
        .map(|r| r.txn_id)
        .collect();
    for request in state.requests.iter().filter(|r| !r.granted) {
        for &holder in &granted {
            graph.entry(request.txn_id).or_default().insert(holder);
        }
    }
}

/// DFS for a cycle, deterministically: start candidates and neighbors are
/// both visited in ascending id order. Returns the cycle's members.
fn find_cycle(graph: &WaitForGraph) -> Option<Vec<TxnId>> {
    for &start in graph.keys() {
        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        if let Some(cycle) = dfs(graph, start, &mut path, &mut on_path) {
            return Some(cycle);
        }
    }
    None
}

fn dfs(
    graph: &WaitForGraph,
    node: TxnId,
    path: &mut Vec<TxnId>,
    on_path: &mut HashSet<TxnId>,
) -> Option<Vec<TxnId>> {
    path.push(node);
    on_path.insert(node);

    if let Some(neighbors) = graph.get(&node) {
        for &next in neighbors {
            if on_path.contains(&next) {
                let start = path
                    .iter()
                    .position(|&t| t == next)
                    .expect("on-path node missing from path");
                return Some(path[start..].to_vec());
            }
            if let Some(cycle) = dfs(graph, next, path, on_path) {
                return Some(cycle);
            }
        }
    }

    path.pop();
    on_path.remove(&node);
    None
}
