use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::catalog::schema::Schema;
use crate::common::config::{PageId, INVALID_PAGE_ID};
use crate::common::error::{Result, StorageError};
use crate::common::rid::Rid;
use crate::storage::table::table_page::TablePage;
use crate::storage::tuple::{Tuple, TupleMeta};

/// Paged heap of versioned rows for one table. New rows append to the last
/// page; full pages chain a fresh one through their next pointer. Base rows
/// are never moved, so rids stay stable and can anchor version chains.
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    schema: Schema,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    pub fn new(bpm: Arc<BufferPoolManager>, schema: Schema) -> Result<Self> {
        let first_page_id;
        {
            let guard = bpm.new_page()?;
            first_page_id = guard.page_id();
            let mut page_guard = guard.upgrade_write();
            TablePage::init().encode(page_guard.data_mut())?;
        }
        debug!("created table heap rooted at page {first_page_id}");

        Ok(Self {
            bpm,
            schema,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Appends a row and returns its rid.
    pub fn insert_tuple(&self, meta: TupleMeta, tuple: &Tuple) -> Result<Rid> {
        let payload = tuple.encode();
        if !TablePage::init().can_fit(payload.len()) {
            return Err(StorageError::TupleTooLarge);
        }

        let mut last_page_id = self.last_page_id.lock().unwrap();
        let mut guard = self.bpm.fetch_page_write(*last_page_id)?;
        let mut page = TablePage::decode(guard.data())?;

        if let Some(slot) = page.insert_tuple(meta, payload.clone()) {
            page.encode(guard.data_mut())?;
            return Ok(Rid::new(*last_page_id, slot));
        }

        // Last page is full: chain a new one and insert there.
        let new_basic = self.bpm.new_page()?;
        let new_page_id = new_basic.page_id();
        let mut new_guard = new_basic.upgrade_write();
        let mut new_page = TablePage::init();
        let slot = new_page
            .insert_tuple(meta, payload)
            .ok_or(StorageError::TupleTooLarge)?;
        new_page.encode(new_guard.data_mut())?;

        page.set_next_page_id(new_page_id);
        page.encode(guard.data_mut())?;
        *last_page_id = new_page_id;
        debug!("table heap grew with page {new_page_id}");

        Ok(Rid::new(new_page_id, slot))
    }

    pub fn tuple(&self, rid: Rid) -> Result<(TupleMeta, Tuple)> {
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        let page = TablePage::decode(guard.data())?;
        let (meta, payload) = page.tuple(rid.slot).ok_or(StorageError::InvalidRid(rid))?;
        drop(guard);
        Ok((meta, Tuple::decode(&self.schema, &payload)?))
    }

    pub fn tuple_meta(&self, rid: Rid) -> Result<TupleMeta> {
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        let page = TablePage::decode(guard.data())?;
        page.tuple_meta(rid.slot).ok_or(StorageError::InvalidRid(rid))
    }

    /// Overwrites a row's metadata, leaving the payload untouched.
    pub fn update_tuple_meta(&self, meta: TupleMeta, rid: Rid) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        let mut page = TablePage::decode(guard.data())?;
        if !page.update_tuple_meta(meta, rid.slot) {
            return Err(StorageError::InvalidRid(rid));
        }
        page.encode(guard.data_mut())
    }

    /// Overwrites a row in place, metadata and payload together.
    pub fn update_tuple_in_place(&self, meta: TupleMeta, tuple: &Tuple, rid: Rid) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        let mut page = TablePage::decode(guard.data())?;
        page.update_tuple(meta, tuple.encode(), rid.slot)?;
        page.encode(guard.data_mut())
    }

    /// Forward scan over every slot in rid order, deleted rows included.
    pub fn iter(&self) -> TableIterator<'_> {
        TableIterator {
            heap: self,
            page_id: self.first_page_id,
            slot: 0,
        }
    }
}

pub struct TableIterator<'a> {
    heap: &'a TableHeap,
    page_id: PageId,
    slot: u32,
}

impl Iterator for TableIterator<'_> {
    type Item = (Rid, TupleMeta, Tuple);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }
            let guard = match self.heap.bpm.fetch_page_read(self.page_id) {
                Ok(guard) => guard,
                Err(err) => {
                    warn!("table scan failed to fetch page {}: {err}", self.page_id);
                    return None;
                }
            };
            let page = match TablePage::decode(guard.data()) {
                Ok(page) => page,
                Err(err) => {
                    warn!("table scan failed to decode page {}: {err}", self.page_id);
                    return None;
                }
            };

            if (self.slot as usize) < page.tuple_count() {
                let rid = Rid::new(self.page_id, self.slot);
                let (meta, payload) = page.tuple(self.slot)?;
                self.slot += 1;
                drop(guard);
                match Tuple::decode(&self.heap.schema, &payload) {
                    Ok(tuple) => return Some((rid, meta, tuple)),
                    Err(err) => {
                        warn!("table scan failed to decode tuple {rid}: {err}");
                        return None;
                    }
                }
            }

            self.page_id = page.next_page_id();
            self.slot = 0;
        }
    }
}
