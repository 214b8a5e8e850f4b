use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hashlink::LinkedHashMap;
use log::warn;

use crate::common::config::{PageId, PAGE_SIZE};
use crate::common::error::{Result, StorageError};

/// Synchronous page I/O over a single database file.
///
/// The manager keeps a per-page offset map so that deallocated pages can be
/// recycled: a deleted page is marked dead and its (id, offset) pair is
/// recorded in the free slot list, to be handed out again by the next
/// allocation. Page ids of dead pages are reused together with their offset.
pub struct DiskManager {
    db_io: File,
    db_file_path: PathBuf,

    // Offset of every allocated page. Dead pages are marked None until their
    // slot is recycled.
    pages: LinkedHashMap<PageId, Option<u64>>,
    free_slots: VecDeque<(PageId, u64)>,

    next_page_id: PageId,

    num_writes: u64,
    num_reads: u64,
}

impl DiskManager {
    pub fn new(db_file_path: &Path) -> Result<Self> {
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_file_path)?;

        Ok(Self {
            db_io,
            db_file_path: db_file_path.to_path_buf(),
            pages: LinkedHashMap::new(),
            free_slots: VecDeque::new(),
            next_page_id: 0,
            num_writes: 0,
            num_reads: 0,
        })
    }

    /// Hands out a page id, recycling a dead slot when one is available.
    pub fn allocate_page(&mut self) -> PageId {
        if let Some((page_id, offset)) = self.free_slots.pop_front() {
            self.pages.replace(page_id, Some(offset));
            return page_id;
        }

        let page_id = self.next_page_id;
        self.next_page_id += 1;
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.pages.insert(page_id, Some(offset));
        page_id
    }

    /// Marks a page dead and queues its slot for reuse.
    pub fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        match self.pages.get(&page_id).copied() {
            Some(Some(offset)) => {
                self.pages.replace(page_id, None);
                self.free_slots.push_back((page_id, offset));
                Ok(())
            }
            Some(None) | None => Err(StorageError::PageNotAllocated(page_id)),
        }
    }

    pub fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> Result<()> {
        let offset = self.page_offset(page_id)?;

        self.db_io.seek(SeekFrom::Start(offset))?;
        self.db_io.write_all(page_data)?;
        self.db_io.flush()?;
        self.num_writes += 1;
        Ok(())
    }

    pub fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> Result<()> {
        let offset = self.page_offset(page_id)?;

        self.db_io.seek(SeekFrom::Start(offset))?;
        match self.db_io.read_exact(page_data) {
            Ok(()) => {}
            // A freshly allocated page may never have been written; reads
            // past the end of the file observe an all-zero page.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!("short read of page {page_id}, zero filling");
                page_data.fill(0);
            }
            Err(e) => return Err(e.into()),
        }
        self.num_reads += 1;
        Ok(())
    }

    pub fn db_file_path(&self) -> &Path {
        &self.db_file_path
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads
    }

    fn page_offset(&self, page_id: PageId) -> Result<u64> {
        match self.pages.get(&page_id) {
            Some(Some(offset)) => Ok(*offset),
            Some(None) | None => Err(StorageError::PageNotAllocated(page_id)),
        }
    }
}
