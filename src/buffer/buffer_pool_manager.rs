use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, warn};

use crate::buffer::lru_k_replacer::{LruKReplacer, Replacer};
use crate::common::config::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::common::error::{Result, StorageError};
use crate::storage::disk::manager::DiskManager;
use crate::storage::disk::scheduler::{DiskData, DiskRequest, DiskScheduler};
use crate::storage::page::page_guard::{PageGuard, ReadPageGuard, WritePageGuard};

/// One slot of the frame array. The data latch doubles as the page latch
/// handed out through read and write guards; pin count and flags are only
/// mutated under the pool latch.
pub struct FrameHeader {
    pub(crate) page_id: AtomicU32,
    pub(crate) pin_count: AtomicU32,
    pub(crate) is_dirty: AtomicBool,
    pub(crate) data: RwLock<Box<[u8]>>,
}

impl FrameHeader {
    fn new() -> Self {
        Self {
            page_id: AtomicU32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
        }
    }
}

// Bookkeeping guarded by the single pool latch.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
}

/// Fixed pool of in-memory frames backed by the paged disk file.
///
/// Every operation takes the pool latch for page table and replacer
/// bookkeeping and releases it before callers touch the returned frame.
/// Disk transfers triggered by eviction and fetch are issued and awaited
/// under that latch; the victim's page table entry is removed before its
/// bytes go out, so a concurrent fetcher can never resolve a frame whose
/// contents are mid write-back.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FrameHeader>,
    state: Mutex<PoolState>,
    disk_scheduler: DiskScheduler,
    disk_manager: Arc<Mutex<DiskManager>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: DiskManager, replacer_k: usize) -> Self {
        let disk_manager = Arc::new(Mutex::new(disk_manager));

        let frames = (0..pool_size).map(|_| FrameHeader::new()).collect();
        let free_list = (0..pool_size).collect();

        Self {
            pool_size,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                replacer: LruKReplacer::new(pool_size, replacer_k),
            }),
            disk_scheduler: DiskScheduler::new(Arc::clone(&disk_manager)),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocates a fresh page and pins it into a frame, zero filled.
    pub fn new_page(&self) -> Result<PageGuard<'_>> {
        let mut state = self.state.lock().unwrap();
        let frame_id = self.alloc_frame(&mut state)?;
        let page_id = self.disk_manager.lock().unwrap().allocate_page();

        let frame = &self.frames[frame_id];
        frame.data.write().unwrap().fill(0);
        frame.page_id.store(page_id, Ordering::Release);
        frame.pin_count.store(1, Ordering::Release);
        frame.is_dirty.store(false, Ordering::Release);

        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false)?;
        state.page_table.insert(page_id, frame_id);
        drop(state);

        debug!("allocated page {page_id} in frame {frame_id}");
        Ok(PageGuard::new(self, frame, page_id))
    }

    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        Ok(PageGuard::new(self, &self.frames[frame_id], page_id))
    }

    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        let frame = &self.frames[frame_id];
        let data = frame.data.read().unwrap();
        Ok(ReadPageGuard::new(self, page_id, data))
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        let frame = &self.frames[frame_id];
        let data = frame.data.write().unwrap();
        Ok(WritePageGuard::new(self, page_id, data))
    }

    /// Drops one pin. Fails on a page that is not resident or not pinned.
    /// A true `is_dirty` is sticky until the page is written back.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count.load(Ordering::Acquire) == 0 {
            return false;
        }
        if frame.pin_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _ = state.replacer.set_evictable(frame_id, true);
        }
        if is_dirty {
            frame.is_dirty.store(true, Ordering::Release);
        }
        true
    }

    /// Writes a resident page back regardless of its dirty flag and clears
    /// the flag. Callers must not hold the page's write latch.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let state = self.state.lock().unwrap();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };
        let frame = &self.frames[frame_id];
        self.write_back(frame, page_id)?;
        frame.is_dirty.store(false, Ordering::Release);
        Ok(true)
    }

    /// Flushes every resident page, logging failures and moving on.
    pub fn flush_all_pages(&self) {
        let page_ids: Vec<PageId> = {
            let state = self.state.lock().unwrap();
            state.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            if let Err(err) = self.flush_page(page_id) {
                warn!("flush of page {page_id} failed: {err}");
            }
        }
    }

    /// Drops an unpinned page from the pool and releases its id back to the
    /// disk allocator. A pinned page is not deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => {
                return match self.disk_manager.lock().unwrap().deallocate_page(page_id) {
                    Ok(()) => Ok(true),
                    Err(StorageError::PageNotAllocated(_)) => Ok(false),
                    Err(err) => Err(err),
                };
            }
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count.load(Ordering::Acquire) > 0 {
            return Ok(false);
        }
        state.replacer.remove(frame_id)?;
        state.page_table.remove(&page_id);
        state.free_list.push_back(frame_id);
        frame.page_id.store(INVALID_PAGE_ID, Ordering::Release);
        frame.is_dirty.store(false, Ordering::Release);
        self.disk_manager.lock().unwrap().deallocate_page(page_id)?;
        debug!("deleted page {page_id}, frame {frame_id} returned to the free list");
        Ok(true)
    }

    /// Current pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock().unwrap();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(self.frames[frame_id].pin_count.load(Ordering::Acquire))
    }

    /// Pins the frame holding `page_id`, reading it from disk if needed.
    fn fetch_frame(&self, page_id: PageId) -> Result<FrameId> {
        let mut state = self.state.lock().unwrap();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            frame.pin_count.fetch_add(1, Ordering::AcqRel);
            state.replacer.record_access(frame_id)?;
            state.replacer.set_evictable(frame_id, false)?;
            return Ok(frame_id);
        }

        let frame_id = self.alloc_frame(&mut state)?;
        let frame = &self.frames[frame_id];
        if let Err(err) = self.read_from_disk(frame, page_id) {
            state.free_list.push_back(frame_id);
            return Err(err);
        }
        frame.page_id.store(page_id, Ordering::Release);
        frame.pin_count.store(1, Ordering::Release);
        frame.is_dirty.store(false, Ordering::Release);
        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false)?;
        state.page_table.insert(page_id, frame_id);
        Ok(frame_id)
    }

    /// Takes a frame from the free list, or evicts a victim, writing its
    /// contents back when dirty.
    fn alloc_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.evict().ok_or(StorageError::PoolExhausted)?;
        let frame = &self.frames[frame_id];
        let old_page_id = frame.page_id.load(Ordering::Acquire);
        state.page_table.remove(&old_page_id);

        if frame.is_dirty.load(Ordering::Acquire) {
            if let Err(err) = self.write_back(frame, old_page_id) {
                // Keep the dirty page reachable rather than losing it.
                state.page_table.insert(old_page_id, frame_id);
                state.replacer.record_access(frame_id)?;
                state.replacer.set_evictable(frame_id, true)?;
                return Err(err);
            }
            frame.is_dirty.store(false, Ordering::Release);
        }

        debug!("evicted page {old_page_id} from frame {frame_id}");
        frame.page_id.store(INVALID_PAGE_ID, Ordering::Release);
        Ok(frame_id)
    }

    fn write_back(&self, frame: &FrameHeader, page_id: PageId) -> Result<()> {
        let data = frame.data.read().unwrap().clone();
        let future = self.disk_scheduler.create_future();
        self.disk_scheduler.schedule(DiskRequest {
            page_id,
            data: DiskData::Write(data),
            done: future.promise(),
        });
        if future.wait() {
            Ok(())
        } else {
            Err(StorageError::DiskRequestFailed(page_id))
        }
    }

    fn read_from_disk(&self, frame: &FrameHeader, page_id: PageId) -> Result<()> {
        let buffer = Arc::new(Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));
        let future = self.disk_scheduler.create_future();
        self.disk_scheduler.schedule(DiskRequest {
            page_id,
            data: DiskData::Read(Arc::clone(&buffer)),
            done: future.promise(),
        });
        if !future.wait() {
            return Err(StorageError::DiskRequestFailed(page_id));
        }
        let mut data = frame.data.write().unwrap();
        data.copy_from_slice(&buffer.lock().unwrap());
        Ok(())
    }
}
