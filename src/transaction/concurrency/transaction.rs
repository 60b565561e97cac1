use std::collections::HashMap;
use parking_lot::Mutex;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase-locking transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// A pending modification, remembered so an abort can undo it. The
/// executors feed this; the core only drains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Delete,
    Update,
}

#[derive(Debug, Clone, Copy)]
pub struct WriteRecord {
    pub oid: TableOid,
    pub rid: Rid,
    pub op: WriteOp,
}

/// An active database transaction: its 2PL phase, isolation level, the
/// locks it holds, and its undo records. Shared between the worker thread
/// driving it and the deadlock detector, hence the interior mutability.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    table_locks: Mutex<HashMap<TableOid, LockMode>>,
    row_locks: Mutex<HashMap<(TableOid, Rid), LockMode>>,
    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            table_locks: Mutex::new(HashMap::new()),
            row_locks: Mutex::new(HashMap::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Mode this transaction holds on a table, if any.
    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        self.table_locks.lock().get(&oid).copied()
    }

    /// Mode this transaction holds on a row, if any.
    pub fn row_lock_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        self.row_locks.lock().get(&(oid, rid)).copied()
    }

    /// Whether any row of the given table is still locked by this
    /// transaction; tables must be unlocked last.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        self.row_locks.lock().keys().any(|&(o, _)| o == oid)
    }

    pub fn record_table_lock(&self, oid: TableOid, mode: LockMode) {
        self.table_locks.lock().insert(oid, mode);
    }

    pub fn erase_table_lock(&self, oid: TableOid) {
        self.table_locks.lock().remove(&oid);
    }

    pub fn record_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        self.row_locks.lock().insert((oid, rid), mode);
    }

    pub fn erase_row_lock(&self, oid: TableOid, rid: Rid) {
        self.row_locks.lock().remove(&(oid, rid));
    }

    pub fn held_table_locks(&self) -> Vec<(TableOid, LockMode)> {
        self.table_locks.lock().iter().map(|(&o, &m)| (o, m)).collect()
    }

    pub fn held_row_locks(&self) -> Vec<(TableOid, Rid, LockMode)> {
        self.row_locks
            .lock()
            .iter()
            .map(|(&(o, r), &m)| (o, r, m))
            .collect()
    }

    pub fn append_write_record(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    /// Hand the undo records to the caller, newest first, clearing the set.
    pub fn take_write_set(&self) -> Vec<WriteRecord> {
        let mut records = std::mem::take(&mut *self.write_set.lock());
        records.reverse();
        records
    }
}
