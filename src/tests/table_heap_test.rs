#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::buffer::buffer_pool_manager::BufferPoolManager;
    use crate::catalog::schema::{Column, DataType, Schema};
    use crate::storage::disk::manager::DiskManager;
    use crate::storage::table::table_heap::TableHeap;
    use crate::storage::tuple::{Datum, Tuple, TupleMeta};

    fn test_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::BigInt),
            Column::new("name", DataType::Varchar),
        ])
    }

    fn test_heap(pool_size: usize) -> (TempDir, TableHeap) {
        let dir = tempfile::tempdir().unwrap();
        let manager = DiskManager::new(&dir.path().join("test.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(pool_size, manager, 2));
        let heap = TableHeap::new(bpm, test_schema()).unwrap();
        (dir, heap)
    }

    fn row(id: i64) -> Tuple {
        Tuple::new(vec![
            Datum::BigInt(id),
            Datum::Varchar(format!("row-{id}")),
        ])
    }

    #[test]
    fn insert_then_get() {
        let (_dir, heap) = test_heap(8);

        let rid = heap.insert_tuple(TupleMeta::new(1, false), &row(42)).unwrap();
        let (meta, tuple) = heap.tuple(rid).unwrap();
        assert_eq!(meta, TupleMeta::new(1, false));
        assert_eq!(tuple, row(42));
    }

    #[test]
    fn rows_spill_over_to_chained_pages() {
        let (_dir, heap) = test_heap(8);

        let count = 500i64;
        let mut rids = Vec::new();
        for id in 0..count {
            rids.push(heap.insert_tuple(TupleMeta::new(id as u64, false), &row(id)).unwrap());
        }

        // More rows than one page can hold.
        assert!(rids.iter().any(|rid| rid.page_id != rids[0].page_id));

        for (id, rid) in rids.iter().enumerate() {
            let (meta, tuple) = heap.tuple(*rid).unwrap();
            assert_eq!(meta.ts, id as u64);
            assert_eq!(tuple, row(id as i64));
        }
    }

    #[test]
    fn iterator_walks_every_row_in_rid_order() {
        let (_dir, heap) = test_heap(8);

        let count = 300i64;
        for id in 0..count {
            heap.insert_tuple(TupleMeta::new(0, false), &row(id)).unwrap();
        }

        let mut seen = 0i64;
        for (rid, _meta, tuple) in heap.iter() {
            assert_eq!(tuple, row(seen));
            assert_eq!(heap.tuple(rid).unwrap().1, tuple);
            seen += 1;
        }
        assert_eq!(seen, count);
    }

    #[test]
    fn metadata_updates_in_place() {
        let (_dir, heap) = test_heap(8);

        let rid = heap.insert_tuple(TupleMeta::new(3, false), &row(1)).unwrap();
        heap.update_tuple_meta(TupleMeta::new(9, true), rid).unwrap();

        let (meta, tuple) = heap.tuple(rid).unwrap();
        assert_eq!(meta, TupleMeta::new(9, true));
        // The payload is untouched.
        assert_eq!(tuple, row(1));
    }

    #[test]
    fn tuples_update_in_place() {
        let (_dir, heap) = test_heap(8);

        let rid = heap.insert_tuple(TupleMeta::new(3, false), &row(1)).unwrap();
        let replacement = Tuple::new(vec![
            Datum::BigInt(1),
            Datum::Varchar("renamed".to_string()),
        ]);
        heap.update_tuple_in_place(TupleMeta::new(4, false), &replacement, rid)
            .unwrap();

        let (meta, tuple) = heap.tuple(rid).unwrap();
        assert_eq!(meta.ts, 4);
        assert_eq!(tuple, replacement);
    }

    #[test]
    fn unknown_rids_are_reported() {
        let (_dir, heap) = test_heap(8);
        let rid = heap.insert_tuple(TupleMeta::new(0, false), &row(1)).unwrap();

        let bogus = crate::common::rid::Rid::new(rid.page_id, 99);
        assert!(heap.tuple(bogus).is_err());
        assert!(heap.update_tuple_meta(TupleMeta::new(0, true), bogus).is_err());
    }
}
