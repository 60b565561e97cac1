mod deadlock;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Hierarchical lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// The standard multigranularity compatibility matrix.
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (IntentionExclusive, _) | (_, IntentionExclusive) => false,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Legal lock upgrades: IS -> {S, X, IX, SIX}, S -> {X, SIX},
    /// IX -> {X, SIX}, SIX -> {X}.
    pub fn upgradable_to(self, target: LockMode) -> bool {
        use LockMode::*;
        match (self, target) {
            (IntentionShared, Shared)
            | (IntentionShared, Exclusive)
            | (IntentionShared, IntentionExclusive)
            | (IntentionShared, SharedIntentionExclusive)
            | (Shared, Exclusive)
            | (Shared, SharedIntentionExclusive)
            | (IntentionExclusive, Exclusive)
            | (IntentionExclusive, SharedIntentionExclusive)
            | (SharedIntentionExclusive, Exclusive) => true,
            _ => false,
        }
    }

    fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        )
    }
}

/// Why a lock request aborted its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    IncompatibleUpgrade,
    AttemptedUnlockButNoLockHeld,
    TableUnlockedBeforeUnlockingRows,
    AttemptedIntentionLockOnRow,
    TableLockNotPresent,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AbortReason::LockOnShrinking => "lock requested while shrinking",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under READ UNCOMMITTED"
            }
            AbortReason::UpgradeConflict => "another upgrade is already in flight",
            AbortReason::IncompatibleUpgrade => "illegal lock upgrade",
            AbortReason::AttemptedUnlockButNoLockHeld => "unlock without a held lock",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "table unlocked while row locks remain"
            }
            AbortReason::AttemptedIntentionLockOnRow => "intention lock requested on a row",
            AbortReason::TableLockNotPresent => "row lock without a covering table lock",
        };
        f.write_str(msg)
    }
}

/// Typed transaction abort; the transaction's state has already been set to
/// `Aborted` when this is returned, the caller unwinds and runs rollback.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

#[derive(Debug, Clone, Copy)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    requests: Vec<LockRequest>,
    /// Transaction with an upgrade in flight, if any.
    upgrading: Option<TxnId>,
}

/// One wait queue per locked resource.
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                requests: Vec::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        })
    }
}

/// Which resource a queue protects; carried through the shared acquire path
/// so the right bookkeeping entry lands in the transaction.
#[derive(Clone, Copy)]
enum Resource {
    Table(TableOid),
    Row(TableOid, Rid),
}

/// Two-phase lock manager over tables and rows with five lock modes,
/// upgrade handling, isolation-level policy and cycle-based deadlock
/// detection.
///
/// Lock order: a map latch is always taken before a queue latch and
/// released before blocking on the queue's condition variable.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    /// Snapshot of the wait-for graph from the latest detector tick.
    waits_for: Mutex<std::collections::BTreeMap<TxnId, std::collections::BTreeSet<TxnId>>>,
    enable_cycle_detection: AtomicBool,
    detector_handle: Mutex<Option<JoinHandle<()>>>,
    deadlock_interval: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl LockManager {
    pub fn new(deadlock_interval: Duration) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(std::collections::BTreeMap::new()),
            enable_cycle_detection: AtomicBool::new(false),
            detector_handle: Mutex::new(None),
            deadlock_interval,
        }
    }

    /// Acquire a table lock, blocking until it is granted. Returns false
    /// when the wait is cancelled because the deadlock detector aborted the
    /// transaction, and also when the transaction re-requests the exact
    /// mode it already holds.
    pub fn lock_table(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        self.validate_table_request(txn, mode)?;

        let queue = {
            let mut map = self.table_lock_map.lock();
            map.entry(oid).or_insert_with(LockRequestQueue::new).clone()
        };
        self.acquire(txn, mode, &queue, Resource::Table(oid))
    }

    /// Release a table lock. All of the transaction's row locks on the
    /// table must have been released first.
    pub fn unlock_table(&self, txn: &Transaction, oid: TableOid) -> Result<bool, TransactionAbort> {
        let Some(held_mode) = txn.table_lock_mode(oid) else {
            return Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        if txn.holds_row_locks_on(oid) {
            return Err(Self::abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let queue = {
            let map = self.table_lock_map.lock();
            map.get(&oid)
                .cloned()
                .expect("held table lock has no request queue")
        };
        Self::remove_request(&queue, txn.id());
        self.transition_on_unlock(txn, held_mode, false);
        txn.erase_table_lock(oid);
        Ok(true)
    }

    /// Acquire a row lock. Only S and X are legal on rows, and the
    /// transaction must already hold an appropriate table lock.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        self.validate_row_request(txn, mode, oid)?;

        let queue = {
            let mut map = self.row_lock_map.lock();
            map.entry(rid).or_insert_with(LockRequestQueue::new).clone()
        };
        self.acquire(txn, mode, &queue, Resource::Row(oid, rid))
    }

    /// Release a row lock. `force` skips the 2PL state transition; the
    /// abort path uses it while tearing a transaction down.
    pub fn unlock_row(
        &self,
        txn: &Transaction,
        oid: TableOid,
        rid: Rid,
        force: bool,
    ) -> Result<bool, TransactionAbort> {
        let Some(held_mode) = txn.row_lock_mode(oid, rid) else {
            return Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let queue = {
            let map = self.row_lock_map.lock();
            map.get(&rid)
                .cloned()
                .expect("held row lock has no request queue")
        };
        Self::remove_request(&queue, txn.id());
        self.transition_on_unlock(txn, held_mode, force);
        txn.erase_row_lock(oid, rid);
        Ok(true)
    }

    /// Release everything a transaction still holds, rows before tables.
    /// Commit and abort funnel through here; no 2PL transition applies.
    pub fn unlock_all(&self, txn: &Transaction) {
        for (oid, rid, _) in txn.held_row_locks() {
            let queue = {
                let map = self.row_lock_map.lock();
                map.get(&rid).cloned()
            };
            if let Some(queue) = queue {
                Self::remove_request(&queue, txn.id());
            }
            txn.erase_row_lock(oid, rid);
        }
        for (oid, _) in txn.held_table_locks() {
            let queue = {
                let map = self.table_lock_map.lock();
                map.get(&oid).cloned()
            };
            if let Some(queue) = queue {
                Self::remove_request(&queue, txn.id());
            }
            txn.erase_table_lock(oid);
        }
    }

    /// The shared queue discipline: splice in the request (upgrades jump
    /// ahead of every other waiter), then wait until the grant predicate
    /// holds or the transaction is aborted out from under us.
    fn acquire(
        &self,
        txn: &Transaction,
        mode: LockMode,
        queue: &Arc<LockRequestQueue>,
        resource: Resource,
    ) -> Result<bool, TransactionAbort> {
        let txn_id = txn.id();
        let mut state = queue.state.lock();

        if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn_id) {
            let held = state.requests[pos];
            debug_assert!(held.granted, "a transaction can only wait on one queue");
            if held.mode == mode {
                return Ok(false);
            }
            if state.upgrading.is_some() {
                return Err(Self::abort(txn, AbortReason::UpgradeConflict));
            }
            if !held.mode.upgradable_to(mode) {
                return Err(Self::abort(txn, AbortReason::IncompatibleUpgrade));
            }

            // Drop the old request and re-enter as the highest-priority
            // waiter, right before the first ungranted request.
            state.requests.remove(pos);
            match resource {
                Resource::Table(oid) => txn.erase_table_lock(oid),
                Resource::Row(oid, rid) => txn.erase_row_lock(oid, rid),
            }
            let insert_at = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                insert_at,
                LockRequest {
                    txn_id,
                    mode,
                    granted: false,
                },
            );
            state.upgrading = Some(txn_id);
        } else {
            state.requests.push(LockRequest {
                txn_id,
                mode,
                granted: false,
            });
        }

        loop {
            if txn.state() == TransactionState::Aborted {
                state.requests.retain(|r| r.txn_id != txn_id);
                if state.upgrading == Some(txn_id) {
                    state.upgrading = None;
                }
                queue.cv.notify_all();
                return Ok(false);
            }
            if Self::try_grant(&mut state, txn_id) {
                break;
            }
            queue.cv.wait(&mut state);
        }

        if state.upgrading == Some(txn_id) {
            state.upgrading = None;
        }
        queue.cv.notify_all();
        drop(state);

        match resource {
            Resource::Table(oid) => txn.record_table_lock(oid, mode),
            Resource::Row(oid, rid) => txn.record_row_lock(oid, rid, mode),
        }
        log::trace!("txn {txn_id} granted {mode:?}");
        Ok(true)
    }

    /// Grant iff the mode is compatible with every granted request and the
    /// request is either the designated upgrader or, with no upgrade in
    /// flight, the first ungranted request in arrival order.
    fn try_grant(state: &mut QueueState, txn_id: TxnId) -> bool {
        let pos = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn_id)
            .expect("waiting request vanished from its queue");
        if state.requests[pos].granted {
            return true;
        }
        let mode = state.requests[pos].mode;

        let compatible = state
            .requests
            .iter()
            .filter(|r| r.granted)
            .all(|r| r.mode.compatible_with(mode));
        if !compatible {
            return false;
        }

        match state.upgrading {
            Some(upgrader) if upgrader != txn_id => return false,
            Some(_) => {}
            None => {
                let first_ungranted = state
                    .requests
                    .iter()
                    .position(|r| !r.granted)
                    .expect("no ungranted request while one is waiting");
                if first_ungranted != pos {
                    return false;
                }
            }
        }

        state.requests[pos].granted = true;
        true
    }

    fn remove_request(queue: &Arc<LockRequestQueue>, txn_id: TxnId) {
        let mut state = queue.state.lock();
        state.requests.retain(|r| r.txn_id != txn_id);
        queue.cv.notify_all();
    }

    /// Isolation-level policy for table locks.
    fn validate_table_request(
        &self,
        txn: &Transaction,
        mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        use LockMode::*;
        match txn.state() {
            TransactionState::Shrinking => match txn.isolation_level() {
                IsolationLevel::RepeatableRead => {
                    Err(Self::abort(txn, AbortReason::LockOnShrinking))
                }
                IsolationLevel::ReadCommitted => {
                    if matches!(mode, Exclusive | IntentionExclusive | SharedIntentionExclusive) {
                        Err(Self::abort(txn, AbortReason::LockOnShrinking))
                    } else {
                        Ok(())
                    }
                }
                IsolationLevel::ReadUncommitted => {
                    if matches!(mode, Exclusive | IntentionExclusive) {
                        Err(Self::abort(txn, AbortReason::LockOnShrinking))
                    } else {
                        Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted))
                    }
                }
            },
            TransactionState::Growing => {
                if txn.isolation_level() == IsolationLevel::ReadUncommitted
                    && matches!(mode, Shared | IntentionShared | SharedIntentionExclusive)
                {
                    Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Isolation-level and hierarchy policy for row locks.
    fn validate_row_request(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<(), TransactionAbort> {
        use LockMode::*;
        if mode.is_intention() {
            return Err(Self::abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        match txn.state() {
            TransactionState::Shrinking => match txn.isolation_level() {
                IsolationLevel::RepeatableRead => {
                    return Err(Self::abort(txn, AbortReason::LockOnShrinking));
                }
                IsolationLevel::ReadCommitted => {
                    if mode == Exclusive {
                        return Err(Self::abort(txn, AbortReason::LockOnShrinking));
                    }
                }
                IsolationLevel::ReadUncommitted => {
                    if mode == Exclusive {
                        return Err(Self::abort(txn, AbortReason::LockOnShrinking));
                    }
                    return Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
            },
            TransactionState::Growing => {
                if txn.isolation_level() == IsolationLevel::ReadUncommitted && mode == Shared {
                    return Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
            }
            _ => {}
        }

        // Row locks require a covering table lock: X rows need IX/X/SIX on
        // the table, S rows any table lock at all.
        let table_mode = txn.table_lock_mode(oid);
        let covered = match mode {
            Exclusive => matches!(
                table_mode,
                Some(IntentionExclusive) | Some(Exclusive) | Some(SharedIntentionExclusive)
            ),
            Shared => table_mode.is_some(),
            _ => unreachable!("intention modes rejected above"),
        };
        if !covered {
            return Err(Self::abort(txn, AbortReason::TableLockNotPresent));
        }
        Ok(())
    }

    /// GROWING -> SHRINKING on release: always for S and X; for intention
    /// modes only under REPEATABLE_READ. Forced releases never transition.
    fn transition_on_unlock(&self, txn: &Transaction, mode: LockMode, force: bool) {
        if force || txn.state() != TransactionState::Growing {
            return;
        }
        let transitions = match mode {
            LockMode::Shared | LockMode::Exclusive => true,
            _ => txn.isolation_level() == IsolationLevel::RepeatableRead,
        };
        if transitions {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn abort(txn: &Transaction, reason: AbortReason) -> TransactionAbort {
        txn.set_state(TransactionState::Aborted);
        TransactionAbort {
            txn_id: txn.id(),
            reason,
        }
    }
}
