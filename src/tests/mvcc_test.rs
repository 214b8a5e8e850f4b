#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::buffer::buffer_pool_manager::BufferPoolManager;
    use crate::catalog::schema::{Column, DataType, Schema};
    use crate::common::config::TableOid;
    use crate::common::error::StorageError;
    use crate::common::rid::Rid;
    use crate::concurrency::transaction::{IsolationLevel, TransactionState};
    use crate::concurrency::transaction_manager::TransactionManager;
    use crate::index::hash::extendible_hash_table::DiskExtendibleHashTable;
    use crate::index::hash::hash_function::DefaultHashFunction;
    use crate::storage::disk::manager::DiskManager;
    use crate::storage::table::table_heap::TableHeap;
    use crate::storage::tuple::{Datum, Tuple};

    const OID: TableOid = 1;

    fn setup() -> (TempDir, Arc<BufferPoolManager>, TransactionManager) {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let manager = DiskManager::new(&dir.path().join("test.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(64, manager, 2));

        let schema = Schema::new(vec![
            Column::new("id", DataType::BigInt),
            Column::new("val", DataType::Int),
        ]);
        let heap = Arc::new(TableHeap::new(Arc::clone(&bpm), schema).unwrap());

        let txn_mgr = TransactionManager::new();
        txn_mgr.register_table(OID, heap);
        (dir, bpm, txn_mgr)
    }

    fn row(id: i64, val: i32) -> Tuple {
        Tuple::new(vec![Datum::BigInt(id), Datum::Int(val)])
    }

    fn val_of(tuple: &Tuple) -> i32 {
        match tuple.value(1) {
            Datum::Int(v) => *v,
            other => panic!("unexpected datum {other:?}"),
        }
    }

    #[test]
    fn writers_see_their_own_writes_readers_see_their_snapshot() {
        let (_dir, _bpm, txn_mgr) = setup();

        let reader = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let writer = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();

        let rid = txn_mgr.insert_tuple(&writer, OID, &row(1, 10)).unwrap();
        assert_eq!(
            txn_mgr.read_tuple(&writer, OID, rid).unwrap().as_ref().map(val_of),
            Some(10)
        );
        assert_eq!(txn_mgr.read_tuple(&reader, OID, rid).unwrap(), None);

        assert!(txn_mgr.commit(&writer).unwrap());

        // The old snapshot still predates the commit.
        assert_eq!(txn_mgr.read_tuple(&reader, OID, rid).unwrap(), None);

        let fresh = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        assert_eq!(
            txn_mgr.read_tuple(&fresh, OID, rid).unwrap().as_ref().map(val_of),
            Some(10)
        );
    }

    #[test]
    fn undo_chains_reconstruct_each_snapshot() {
        let (_dir, _bpm, txn_mgr) = setup();

        let t1 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let rid = txn_mgr.insert_tuple(&t1, OID, &row(1, 10)).unwrap();
        assert!(txn_mgr.commit(&t1).unwrap());

        let reader_v1 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();

        let t2 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        txn_mgr.update_tuple(&t2, OID, rid, row(1, 20)).unwrap();
        assert!(txn_mgr.commit(&t2).unwrap());

        let reader_v2 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();

        let t3 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        txn_mgr.update_tuple(&t3, OID, rid, row(1, 30)).unwrap();
        assert!(txn_mgr.commit(&t3).unwrap());

        assert_eq!(
            txn_mgr.read_tuple(&reader_v1, OID, rid).unwrap().as_ref().map(val_of),
            Some(10)
        );
        assert_eq!(
            txn_mgr.read_tuple(&reader_v2, OID, rid).unwrap().as_ref().map(val_of),
            Some(20)
        );
        let latest = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        assert_eq!(
            txn_mgr.read_tuple(&latest, OID, rid).unwrap().as_ref().map(val_of),
            Some(30)
        );
    }

    #[test]
    fn first_writer_wins_the_second_is_tainted() {
        let (_dir, _bpm, txn_mgr) = setup();

        let t0 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let rid = txn_mgr.insert_tuple(&t0, OID, &row(1, 10)).unwrap();
        assert!(txn_mgr.commit(&t0).unwrap());

        let t1 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let t2 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();

        txn_mgr.update_tuple(&t2, OID, rid, row(1, 22)).unwrap();
        assert!(txn_mgr.commit(&t2).unwrap());

        // T1's snapshot predates T2's commit; its write must lose.
        let err = txn_mgr.update_tuple(&t1, OID, rid, row(1, 11)).unwrap_err();
        assert!(matches!(err, StorageError::WriteConflict { .. }));
        assert_eq!(t1.state(), TransactionState::Tainted);

        assert!(!txn_mgr.commit(&t1).unwrap());
        assert_eq!(t1.state(), TransactionState::Aborted);

        let fresh = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        assert_eq!(
            txn_mgr.read_tuple(&fresh, OID, rid).unwrap().as_ref().map(val_of),
            Some(22)
        );
    }

    #[test]
    fn abort_restores_the_pre_transaction_snapshot() {
        let (_dir, _bpm, txn_mgr) = setup();

        let t0 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let rid = txn_mgr.insert_tuple(&t0, OID, &row(1, 10)).unwrap();
        assert!(txn_mgr.commit(&t0).unwrap());

        let t1 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        txn_mgr.update_tuple(&t1, OID, rid, row(1, 20)).unwrap();
        assert_eq!(
            txn_mgr.read_tuple(&t1, OID, rid).unwrap().as_ref().map(val_of),
            Some(20)
        );
        txn_mgr.abort(&t1).unwrap();
        assert_eq!(t1.state(), TransactionState::Aborted);

        let fresh = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        assert_eq!(
            txn_mgr.read_tuple(&fresh, OID, rid).unwrap().as_ref().map(val_of),
            Some(10)
        );

        // An aborted insert leaves the row deleted for everyone.
        let t2 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let rid2 = txn_mgr.insert_tuple(&t2, OID, &row(2, 5)).unwrap();
        txn_mgr.abort(&t2).unwrap();
        let after = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        assert_eq!(txn_mgr.read_tuple(&after, OID, rid2).unwrap(), None);
    }

    #[test]
    fn deletes_are_versioned_like_updates() {
        let (_dir, _bpm, txn_mgr) = setup();

        let t0 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let rid = txn_mgr.insert_tuple(&t0, OID, &row(1, 10)).unwrap();
        assert!(txn_mgr.commit(&t0).unwrap());

        let old_reader = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();

        let t1 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        txn_mgr.delete_tuple(&t1, OID, rid).unwrap();
        assert_eq!(txn_mgr.read_tuple(&t1, OID, rid).unwrap(), None);
        assert_eq!(
            txn_mgr.read_tuple(&old_reader, OID, rid).unwrap().as_ref().map(val_of),
            Some(10)
        );
        assert!(txn_mgr.commit(&t1).unwrap());

        let fresh = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        assert_eq!(txn_mgr.read_tuple(&fresh, OID, rid).unwrap(), None);
        // The pre-delete snapshot still reconstructs the row.
        assert_eq!(
            txn_mgr.read_tuple(&old_reader, OID, rid).unwrap().as_ref().map(val_of),
            Some(10)
        );
    }

    #[test]
    fn repeated_writes_keep_one_undo_log_per_row() {
        let (_dir, _bpm, txn_mgr) = setup();

        let t0 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let rid = txn_mgr.insert_tuple(&t0, OID, &row(1, 10)).unwrap();
        assert!(txn_mgr.commit(&t0).unwrap());

        let old_reader = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();

        let t1 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        txn_mgr.update_tuple(&t1, OID, rid, row(1, 20)).unwrap();
        txn_mgr.update_tuple(&t1, OID, rid, row(1, 30)).unwrap();
        assert_eq!(t1.num_undo_logs(), 1);
        assert_eq!(
            txn_mgr.read_tuple(&t1, OID, rid).unwrap().as_ref().map(val_of),
            Some(30)
        );
        assert!(txn_mgr.commit(&t1).unwrap());

        // The merged log still reconstructs the pre-transaction image.
        assert_eq!(
            txn_mgr.read_tuple(&old_reader, OID, rid).unwrap().as_ref().map(val_of),
            Some(10)
        );
    }

    #[test]
    fn serializable_commit_replays_scan_predicates() {
        let (_dir, _bpm, txn_mgr) = setup();

        let t0 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let anchor = txn_mgr.insert_tuple(&t0, OID, &row(1, 1)).unwrap();
        assert!(txn_mgr.commit(&t0).unwrap());

        let t1 = txn_mgr.begin(IsolationLevel::Serializable).unwrap();
        t1.append_scan_predicate(
            OID,
            Arc::new(|tuple: &Tuple| matches!(tuple.value(1), Datum::Int(5))),
        );
        txn_mgr.update_tuple(&t1, OID, anchor, row(1, 2)).unwrap();

        // A concurrent insert satisfies T1's predicate and commits first.
        let t2 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        txn_mgr.insert_tuple(&t2, OID, &row(2, 5)).unwrap();
        assert!(txn_mgr.commit(&t2).unwrap());

        assert!(!txn_mgr.commit(&t1).unwrap());
        assert_eq!(t1.state(), TransactionState::Aborted);
    }

    #[test]
    fn serializable_commit_passes_without_overlap() {
        let (_dir, _bpm, txn_mgr) = setup();

        let t0 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let anchor = txn_mgr.insert_tuple(&t0, OID, &row(1, 1)).unwrap();
        assert!(txn_mgr.commit(&t0).unwrap());

        let t1 = txn_mgr.begin(IsolationLevel::Serializable).unwrap();
        t1.append_scan_predicate(
            OID,
            Arc::new(|tuple: &Tuple| matches!(tuple.value(1), Datum::Int(7))),
        );
        txn_mgr.update_tuple(&t1, OID, anchor, row(1, 2)).unwrap();

        let t2 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        txn_mgr.insert_tuple(&t2, OID, &row(2, 5)).unwrap();
        assert!(txn_mgr.commit(&t2).unwrap());

        assert!(txn_mgr.commit(&t1).unwrap());
        assert_eq!(t1.state(), TransactionState::Committed);
    }

    #[test]
    fn watermark_follows_the_oldest_live_reader() {
        let (_dir, _bpm, txn_mgr) = setup();

        let t1 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let t2 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        assert_eq!(txn_mgr.watermark(), 0);

        let writer = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        txn_mgr.insert_tuple(&writer, OID, &row(1, 1)).unwrap();
        assert!(txn_mgr.commit(&writer).unwrap());
        assert_eq!(txn_mgr.last_commit_ts(), 1);

        // Both readers still hold the old snapshot.
        assert_eq!(txn_mgr.watermark(), 0);

        assert!(txn_mgr.commit(&t1).unwrap());
        assert_eq!(txn_mgr.watermark(), 0);
        txn_mgr.abort(&t2).unwrap();
        assert_eq!(txn_mgr.watermark(), txn_mgr.last_commit_ts());
    }

    #[test]
    fn garbage_collection_frees_unreachable_transactions() {
        let (_dir, _bpm, txn_mgr) = setup();

        let t1 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let t1_id = t1.id();
        let rid = txn_mgr.insert_tuple(&t1, OID, &row(1, 10)).unwrap();
        assert!(txn_mgr.commit(&t1).unwrap());

        let reader = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();

        let t2 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let t2_id = t2.id();
        txn_mgr.update_tuple(&t2, OID, rid, row(1, 20)).unwrap();
        assert!(txn_mgr.commit(&t2).unwrap());

        let t3 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let t3_id = t3.id();
        txn_mgr.update_tuple(&t3, OID, rid, row(1, 30)).unwrap();
        assert!(txn_mgr.commit(&t3).unwrap());

        assert_eq!(txn_mgr.watermark(), 1);
        txn_mgr.garbage_collect();

        // T1 contributed no surviving undo log; T2 and T3 still anchor the
        // chain the live reader needs.
        assert!(txn_mgr.get_transaction(t1_id).is_none());
        assert!(txn_mgr.get_transaction(t2_id).is_some());
        assert!(txn_mgr.get_transaction(t3_id).is_some());
        assert_eq!(
            txn_mgr.read_tuple(&reader, OID, rid).unwrap().as_ref().map(val_of),
            Some(10)
        );

        assert!(txn_mgr.commit(&reader).unwrap());
        txn_mgr.garbage_collect();
        assert_eq!(txn_mgr.num_live_transactions(), 0);

        let fresh = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        assert_eq!(
            txn_mgr.read_tuple(&fresh, OID, rid).unwrap().as_ref().map(val_of),
            Some(30)
        );
    }

    #[test]
    fn commit_of_a_finished_transaction_is_a_fault() {
        let (_dir, _bpm, txn_mgr) = setup();

        let t1 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        assert!(txn_mgr.commit(&t1).unwrap());
        assert!(matches!(
            txn_mgr.commit(&t1),
            Err(StorageError::InvalidTxnState(_))
        ));
        assert!(matches!(
            txn_mgr.abort(&t1),
            Err(StorageError::InvalidTxnState(_))
        ));
    }

    #[test]
    fn primary_key_index_serialises_inserters() {
        let (_dir, bpm, txn_mgr) = setup();
        let pk_index = DiskExtendibleHashTable::<i64, Rid, DefaultHashFunction>::new(
            bpm,
            DefaultHashFunction,
            1,
            4,
            8,
        )
        .unwrap();

        let t1 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        let rid = txn_mgr.insert_tuple(&t1, OID, &row(1, 10)).unwrap();
        assert!(pk_index.insert(1, rid).unwrap());
        assert!(txn_mgr.commit(&t1).unwrap());

        // A second inserter of the same key loses at the index and never
        // touches the heap.
        let t2 = txn_mgr.begin(IsolationLevel::SnapshotIsolation).unwrap();
        assert!(!pk_index.insert(1, Rid::new(0, 0)).unwrap());
        txn_mgr.abort(&t2).unwrap();

        assert_eq!(pk_index.lookup(&1).unwrap(), Some(rid));
    }
}
