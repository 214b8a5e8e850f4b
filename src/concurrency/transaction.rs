use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::config::{
    TableOid, Timestamp, TxnId, INVALID_TIMESTAMP, INVALID_TXN_ID, TXN_START_ID,
};
use crate::common::rid::Rid;
use crate::storage::tuple::Tuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    SnapshotIsolation,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Running,
    Tainted,
    Committed,
    Aborted,
}

/// Head pointer into a transaction's undo log arena: the owning transaction
/// id and the log's index within it. Indices never move, so a link stays
/// valid until garbage collection frees the whole transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoLink {
    pub prev_txn: TxnId,
    pub prev_log_idx: usize,
}

impl UndoLink {
    pub const INVALID: UndoLink = UndoLink {
        prev_txn: INVALID_TXN_ID,
        prev_log_idx: 0,
    };

    pub fn new(prev_txn: TxnId, prev_log_idx: usize) -> Self {
        Self {
            prev_txn,
            prev_log_idx,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.prev_txn != INVALID_TXN_ID
    }
}

/// Partial before-image of one tuple version. `tuple` carries only the
/// columns flagged in `modified_fields`, in column order. An `is_deleted`
/// log marks a version at which the row did not exist.
#[derive(Debug, Clone)]
pub struct UndoLog {
    pub is_deleted: bool,
    pub modified_fields: Vec<bool>,
    pub tuple: Tuple,
    pub ts: Timestamp,
    pub prev_version: UndoLink,
}

/// Predicate a scan remembers so serializable commits can replay it against
/// concurrently committed versions.
pub type ScanPredicate = Arc<dyn Fn(&Tuple) -> bool + Send + Sync>;

/// A single transaction's private state. The transaction manager holds the
/// map of live transactions; operators borrow the `Arc` while running.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    read_ts: Timestamp,
    commit_ts: AtomicU64,
    state: Mutex<TransactionState>,

    // Arena of undo logs owned by this transaction, addressed by UndoLink.
    undo_logs: Mutex<Vec<UndoLog>>,
    write_set: Mutex<HashMap<TableOid, HashSet<Rid>>>,
    scan_predicates: Mutex<HashMap<TableOid, Vec<ScanPredicate>>>,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, isolation_level: IsolationLevel, read_ts: Timestamp) -> Self {
        Self {
            id,
            isolation_level,
            read_ts,
            commit_ts: AtomicU64::new(INVALID_TIMESTAMP),
            state: Mutex::new(TransactionState::Running),
            undo_logs: Mutex::new(Vec::new()),
            write_set: Mutex::new(HashMap::new()),
            scan_predicates: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    pub fn commit_ts(&self) -> Option<Timestamp> {
        match self.commit_ts.load(Ordering::Acquire) {
            INVALID_TIMESTAMP => None,
            ts => Some(ts),
        }
    }

    pub(crate) fn set_commit_ts(&self, commit_ts: Timestamp) {
        self.commit_ts.store(commit_ts, Ordering::Release);
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Stamp carried by this transaction's uncommitted writes.
    pub fn temp_ts(&self) -> Timestamp {
        TXN_START_ID | self.id
    }

    pub fn append_undo_log(&self, log: UndoLog) -> UndoLink {
        let mut undo_logs = self.undo_logs.lock().unwrap();
        undo_logs.push(log);
        UndoLink::new(self.id, undo_logs.len() - 1)
    }

    pub fn modify_undo_log(&self, log_idx: usize, log: UndoLog) {
        let mut undo_logs = self.undo_logs.lock().unwrap();
        undo_logs[log_idx] = log;
    }

    pub fn undo_log(&self, log_idx: usize) -> Option<UndoLog> {
        self.undo_logs.lock().unwrap().get(log_idx).cloned()
    }

    pub fn num_undo_logs(&self) -> usize {
        self.undo_logs.lock().unwrap().len()
    }

    pub fn append_write_set(&self, oid: TableOid, rid: Rid) {
        self.write_set
            .lock()
            .unwrap()
            .entry(oid)
            .or_default()
            .insert(rid);
    }

    pub fn write_set(&self) -> HashMap<TableOid, HashSet<Rid>> {
        self.write_set.lock().unwrap().clone()
    }

    pub fn append_scan_predicate(&self, oid: TableOid, predicate: ScanPredicate) {
        self.scan_predicates
            .lock()
            .unwrap()
            .entry(oid)
            .or_default()
            .push(predicate);
    }

    pub fn scan_predicates(&self, oid: TableOid) -> Vec<ScanPredicate> {
        self.scan_predicates
            .lock()
            .unwrap()
            .get(&oid)
            .cloned()
            .unwrap_or_default()
    }
}
