use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::common::config::{is_committed_ts, TableOid, Timestamp, TxnId};
use crate::common::error::{Result, StorageError};
use crate::common::rid::Rid;
use crate::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState, UndoLink, UndoLog,
};
use crate::concurrency::version_store::VersionStore;
use crate::concurrency::watermark::Watermark;
use crate::storage::table::table_heap::TableHeap;
use crate::storage::tuple::{Tuple, TupleMeta};

/// Restores the columns a log captured over the given tuple image.
pub fn replay_undo_log(base: &Tuple, log: &UndoLog) -> Tuple {
    let mut values = base.values().to_vec();
    let mut log_idx = 0;
    for (col, modified) in log.modified_fields.iter().enumerate() {
        if *modified {
            values[col] = log.tuple.value(log_idx).clone();
            log_idx += 1;
        }
    }
    Tuple::new(values)
}

/// MVCC transaction manager: snapshot reads over undo chains, first writer
/// wins conflict detection, commit timestamp ordering and garbage collection
/// of versions below the watermark.
///
/// Readers never block writers. Writers stamp uncommitted rows with their
/// temp timestamp, keep before-images in their own undo log arena and link
/// them into the per-rid version chains held by the version store.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    txn_map: RwLock<HashMap<TxnId, Arc<Transaction>>>,
    running_txns: Watermark,
    last_commit_ts: AtomicU64,
    // Serialises the read-modify-write of last_commit_ts, keeping commit
    // timestamps strictly monotonic.
    commit_latch: Mutex<()>,
    version_store: VersionStore,
    tables: RwLock<HashMap<TableOid, Arc<TableHeap>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            txn_map: RwLock::new(HashMap::new()),
            running_txns: Watermark::new(0),
            last_commit_ts: AtomicU64::new(0),
            commit_latch: Mutex::new(()),
            version_store: VersionStore::new(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Makes a table heap visible to verification and garbage collection.
    pub fn register_table(&self, oid: TableOid, heap: Arc<TableHeap>) {
        self.tables.write().unwrap().insert(oid, heap);
    }

    pub fn table(&self, oid: TableOid) -> Result<Arc<TableHeap>> {
        self.tables
            .read()
            .unwrap()
            .get(&oid)
            .cloned()
            .ok_or(StorageError::UnknownTable(oid))
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Result<Arc<Transaction>> {
        let mut txn_map = self.txn_map.write().unwrap();
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let read_ts = self.last_commit_ts.load(Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id, isolation_level, read_ts));
        self.running_txns.add_txn(read_ts)?;
        txn_map.insert(id, Arc::clone(&txn));
        debug!("txn {id} began with read ts {read_ts}");
        Ok(txn)
    }

    pub fn watermark(&self) -> Timestamp {
        self.running_txns.watermark()
    }

    pub fn last_commit_ts(&self) -> Timestamp {
        self.last_commit_ts.load(Ordering::SeqCst)
    }

    pub fn version_store(&self) -> &VersionStore {
        &self.version_store
    }

    pub fn get_undo_link(&self, rid: Rid) -> Option<UndoLink> {
        self.version_store.undo_link(rid)
    }

    pub fn get_undo_log(&self, link: UndoLink) -> Option<UndoLog> {
        let txn_map = self.txn_map.read().unwrap();
        txn_map.get(&link.prev_txn)?.undo_log(link.prev_log_idx)
    }

    pub fn get_transaction(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.read().unwrap().get(&id).cloned()
    }

    pub fn num_live_transactions(&self) -> usize {
        self.txn_map.read().unwrap().len()
    }

    /// Reads the version of a tuple visible at the transaction's snapshot,
    /// or the transaction's own uncommitted write.
    pub fn read_tuple(&self, txn: &Transaction, oid: TableOid, rid: Rid) -> Result<Option<Tuple>> {
        let heap = self.table(oid)?;
        let (meta, base) = heap.tuple(rid)?;

        if meta.ts == txn.temp_ts() || (is_committed_ts(meta.ts) && meta.ts <= txn.read_ts()) {
            return Ok(if meta.is_deleted { None } else { Some(base) });
        }

        // Base version is too new or belongs to another writer; walk the
        // undo chain back to the snapshot.
        let mut image = base;
        let mut deleted = meta.is_deleted;
        let mut link = self.version_store.undo_link(rid);
        while let Some(current) = link.filter(UndoLink::is_valid) {
            let log = match self.get_undo_log(current) {
                Some(log) => log,
                None => break,
            };
            deleted = log.is_deleted;
            if !log.is_deleted {
                image = replay_undo_log(&image, &log);
            }
            if log.ts <= txn.read_ts() {
                return Ok(if deleted { None } else { Some(image) });
            }
            link = Some(log.prev_version);
        }
        // The chain ended above the snapshot; the row did not exist yet.
        Ok(None)
    }

    /// Appends a new row stamped with the writer's temp timestamp.
    /// Key uniqueness is the caller's business, enforced through the
    /// primary key index before the heap insert.
    pub fn insert_tuple(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        tuple: &Tuple,
    ) -> Result<Rid> {
        let heap = self.table(oid)?;
        let rid = heap.insert_tuple(TupleMeta::new(txn.temp_ts(), false), tuple)?;
        self.version_store.try_begin_write(rid);
        txn.append_write_set(oid, rid);
        debug!("txn {} inserted {rid}", txn.id());
        Ok(rid)
    }

    pub fn update_tuple(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
        new_tuple: Tuple,
    ) -> Result<()> {
        self.modify_tuple(txn, oid, rid, Some(new_tuple))
    }

    pub fn delete_tuple(&self, txn: &Arc<Transaction>, oid: TableOid, rid: Rid) -> Result<()> {
        self.modify_tuple(txn, oid, rid, None)
    }

    /// The operator write path. `None` deletes the row. The first write of
    /// a transaction to a row appends an undo log and links it as the chain
    /// head; later writes merge into that log so each writer owns at most
    /// one undo entry per row.
    fn modify_tuple(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
        new_tuple: Option<Tuple>,
    ) -> Result<()> {
        let heap = self.table(oid)?;
        let temp_ts = txn.temp_ts();
        let (meta, base) = heap.tuple(rid)?;

        if meta.ts == temp_ts {
            // Self modification: the row already carries this writer's stamp.
            if let Some(link) = self.version_store.undo_link(rid).filter(UndoLink::is_valid) {
                if link.prev_txn == txn.id() {
                    if let Some(old_log) = txn.undo_log(link.prev_log_idx) {
                        let merged = merge_undo_log(&old_log, &base, new_tuple.as_ref());
                        txn.modify_undo_log(link.prev_log_idx, merged);
                    }
                }
            }
            return self.apply_in_place(&heap, txn, oid, rid, temp_ts, new_tuple);
        }

        // First touch. A base stamp above our snapshot, committed or not,
        // is a lost write-write race.
        if !is_committed_ts(meta.ts) || meta.ts > txn.read_ts() {
            txn.set_state(TransactionState::Tainted);
            return Err(StorageError::WriteConflict {
                txn_id: txn.id(),
                rid,
            });
        }

        if !self.version_store.try_begin_write(rid) {
            txn.set_state(TransactionState::Tainted);
            return Err(StorageError::WriteConflict {
                txn_id: txn.id(),
                rid,
            });
        }

        // Re-check under the marker: a competing writer may have committed
        // between the stamp check and the claim.
        let current_meta = heap.tuple_meta(rid)?;
        if current_meta.ts != meta.ts || current_meta.is_deleted != meta.is_deleted {
            self.version_store.unset_in_progress(rid);
            txn.set_state(TransactionState::Tainted);
            return Err(StorageError::WriteConflict {
                txn_id: txn.id(),
                rid,
            });
        }

        let prev = self
            .version_store
            .undo_link(rid)
            .unwrap_or(UndoLink::INVALID);
        let undo_log = diff_undo_log(&meta, &base, new_tuple.as_ref(), prev);
        let link = txn.append_undo_log(undo_log);
        self.version_store.set_undo_link(rid, link);

        self.apply_in_place(&heap, txn, oid, rid, temp_ts, new_tuple)
    }

    fn apply_in_place(
        &self,
        heap: &TableHeap,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
        temp_ts: Timestamp,
        new_tuple: Option<Tuple>,
    ) -> Result<()> {
        match new_tuple {
            Some(tuple) => {
                heap.update_tuple_in_place(TupleMeta::new(temp_ts, false), &tuple, rid)?
            }
            None => heap.update_tuple_meta(TupleMeta::new(temp_ts, true), rid)?,
        }
        txn.append_write_set(oid, rid);
        Ok(())
    }

    /// Commits a running transaction: optional serializable verification,
    /// then a single atomic stamp of every written row with the next commit
    /// timestamp. Returns false when verification found a conflict.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<bool> {
        let commit_guard = self.commit_latch.lock().unwrap();
        match txn.state() {
            TransactionState::Running => {}
            TransactionState::Tainted => {
                // A tainted writer already lost a conflict; its commit is
                // the conflict outcome, not a protocol fault.
                drop(commit_guard);
                self.abort(txn)?;
                return Ok(false);
            }
            _ => return Err(StorageError::InvalidTxnState(txn.id())),
        }
        let commit_ts = self.last_commit_ts.load(Ordering::SeqCst) + 1;

        if txn.isolation_level() == IsolationLevel::Serializable && !self.verify_txn(txn)? {
            drop(commit_guard);
            debug!("txn {} failed serializable verification", txn.id());
            self.abort(txn)?;
            return Ok(false);
        }

        for (oid, rids) in txn.write_set() {
            let heap = self.table(oid)?;
            for rid in rids {
                let meta = heap.tuple_meta(rid)?;
                heap.update_tuple_meta(TupleMeta::new(commit_ts, meta.is_deleted), rid)?;
                self.version_store.unset_in_progress(rid);
            }
        }

        {
            // Txn map latch is taken after the commit latch when both are
            // needed.
            let _txn_map = self.txn_map.write().unwrap();
            txn.set_commit_ts(commit_ts);
            txn.set_state(TransactionState::Committed);
            self.last_commit_ts.store(commit_ts, Ordering::SeqCst);
            self.running_txns.update_commit_ts(commit_ts);
            self.running_txns.remove_txn(txn.read_ts());
        }
        debug!("txn {} committed at ts {commit_ts}", txn.id());
        Ok(true)
    }

    /// Rolls a running or tainted transaction back to the snapshot its
    /// writes replaced, through undo replay.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        let state = txn.state();
        if state != TransactionState::Running && state != TransactionState::Tainted {
            return Err(StorageError::InvalidTxnState(txn.id()));
        }

        for (oid, rids) in txn.write_set() {
            let heap = self.table(oid)?;
            for rid in rids {
                match self
                    .version_store
                    .undo_link(rid)
                    .filter(UndoLink::is_valid)
                    .and_then(|link| self.get_undo_log(link))
                {
                    Some(undo_log) => {
                        if undo_log.is_deleted {
                            heap.update_tuple_meta(TupleMeta::new(undo_log.ts, true), rid)?;
                        } else {
                            let (_, current) = heap.tuple(rid)?;
                            let restored = replay_undo_log(&current, &undo_log);
                            heap.update_tuple_in_place(
                                TupleMeta::new(undo_log.ts, false),
                                &restored,
                                rid,
                            )?;
                        }
                    }
                    None => {
                        // No prior version: the row was inserted by this
                        // transaction.
                        heap.update_tuple_meta(TupleMeta::new(0, true), rid)?;
                    }
                }
                self.version_store.unset_in_progress(rid);
            }
        }

        self.running_txns.remove_txn(txn.read_ts());
        txn.set_state(TransactionState::Aborted);
        debug!("txn {} aborted", txn.id());
        Ok(())
    }

    /// Replays this transaction's remembered scan predicates against every
    /// version, at or after its snapshot, written by transactions that
    /// committed after it began. Any match is a serializability conflict.
    fn verify_txn(&self, txn: &Transaction) -> Result<bool> {
        if txn.state() == TransactionState::Tainted {
            return Ok(false);
        }
        let write_set = txn.write_set();
        if write_set.is_empty() {
            return Ok(true);
        }
        let read_ts = txn.read_ts();

        let mut conflict_rids: HashMap<TableOid, HashSet<Rid>> = HashMap::new();
        {
            let txn_map = self.txn_map.read().unwrap();
            for other in txn_map.values() {
                if other.state() == TransactionState::Committed
                    && other.commit_ts().is_some_and(|ts| ts > read_ts)
                {
                    for (oid, rids) in other.write_set() {
                        conflict_rids.entry(oid).or_default().extend(rids);
                    }
                }
            }
        }

        for (oid, rids) in conflict_rids {
            let predicates = txn.scan_predicates(oid);
            if predicates.is_empty() {
                continue;
            }
            let heap = self.table(oid)?;
            for rid in rids {
                let (meta, base) = heap.tuple(rid)?;
                if is_committed_ts(meta.ts)
                    && !meta.is_deleted
                    && predicates.iter().any(|p| p(&base))
                {
                    return Ok(false);
                }

                let mut image = base;
                let mut link = self.version_store.undo_link(rid);
                while let Some(current) = link.filter(UndoLink::is_valid) {
                    let log = match self.get_undo_log(current) {
                        Some(log) => log,
                        None => break,
                    };
                    if log.ts < read_ts {
                        break;
                    }
                    if !log.is_deleted {
                        image = replay_undo_log(&image, &log);
                        if predicates.iter().any(|p| p(&image)) {
                            return Ok(false);
                        }
                    }
                    link = Some(log.prev_version);
                }
            }
        }
        Ok(true)
    }

    /// Frees transactions whose undo logs can no longer be reached by any
    /// snapshot at or below the watermark. Walking each chain stops one log
    /// past the first version at or below the watermark, the oldest one a
    /// live reader may still need.
    pub fn garbage_collect(&self) {
        let watermark = self.watermark();
        let mut live_txns: HashSet<TxnId> = HashSet::new();

        let tables: Vec<Arc<TableHeap>> = self.tables.read().unwrap().values().cloned().collect();
        for heap in tables {
            for (rid, meta, _) in heap.iter() {
                if is_committed_ts(meta.ts) && meta.ts <= watermark {
                    continue;
                }
                let mut reached_watermark = false;
                let mut link = self.version_store.undo_link(rid);
                while let Some(current) = link.filter(UndoLink::is_valid) {
                    let log = match self.get_undo_log(current) {
                        Some(log) => log,
                        None => break,
                    };
                    if log.ts <= watermark {
                        if reached_watermark {
                            break;
                        }
                        reached_watermark = true;
                    }
                    live_txns.insert(current.prev_txn);
                    link = Some(log.prev_version);
                }
            }
        }

        let mut txn_map = self.txn_map.write().unwrap();
        let before = txn_map.len();
        txn_map.retain(|id, txn| {
            live_txns.contains(id)
                || !matches!(
                    txn.state(),
                    TransactionState::Committed | TransactionState::Aborted
                )
        });
        debug!(
            "garbage collection freed {} transactions below watermark {watermark}",
            before - txn_map.len()
        );
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Before-image log for the first write of a transaction to a row: the
/// columns the write changes, or the full row for a delete.
fn diff_undo_log(
    meta: &TupleMeta,
    base: &Tuple,
    new_tuple: Option<&Tuple>,
    prev_version: UndoLink,
) -> UndoLog {
    match new_tuple {
        Some(new) => {
            let mut modified_fields = vec![false; base.num_values()];
            let mut values = Vec::new();
            for idx in 0..base.num_values() {
                if base.value(idx) != new.value(idx) {
                    modified_fields[idx] = true;
                    values.push(base.value(idx).clone());
                }
            }
            UndoLog {
                is_deleted: meta.is_deleted,
                modified_fields,
                tuple: Tuple::new(values),
                ts: meta.ts,
                prev_version,
            }
        }
        None => UndoLog {
            is_deleted: meta.is_deleted,
            modified_fields: vec![true; base.num_values()],
            tuple: base.clone(),
            ts: meta.ts,
            prev_version,
        },
    }
}

/// Folds a later write by the same transaction into its existing log,
/// keeping the original before-image for columns it already captured and
/// capturing the pre-transaction value for newly touched ones.
fn merge_undo_log(old_log: &UndoLog, base: &Tuple, new_tuple: Option<&Tuple>) -> UndoLog {
    let num_values = base.num_values();
    let newly_modified: Vec<bool> = match new_tuple {
        Some(new) => (0..num_values)
            .map(|idx| base.value(idx) != new.value(idx))
            .collect(),
        None => vec![true; num_values],
    };

    let mut modified_fields = vec![false; num_values];
    let mut values = Vec::new();
    let mut old_pos = 0;
    for idx in 0..num_values {
        if old_log.modified_fields.get(idx).copied().unwrap_or(false) {
            modified_fields[idx] = true;
            values.push(old_log.tuple.value(old_pos).clone());
            old_pos += 1;
        } else if newly_modified[idx] {
            modified_fields[idx] = true;
            values.push(base.value(idx).clone());
        }
    }

    UndoLog {
        is_deleted: old_log.is_deleted,
        modified_fields,
        tuple: Tuple::new(values),
        ts: old_log.ts,
        prev_version: old_log.prev_version,
    }
}
