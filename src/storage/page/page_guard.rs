use std::mem::ManuallyDrop;
use std::sync::atomic::Ordering;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::buffer_pool_manager::{BufferPoolManager, FrameHeader};
use crate::common::config::PageId;

type PageBytes = Box<[u8]>;

/// Scoped handle on a pinned page without a latch. Dropping it unpins the
/// page with whatever dirty state accumulated through [`PageGuard::data_mut`].
///
/// All three guards are move-only; releasing happens exactly once, on drop
/// or when upgrading transfers ownership.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a FrameHeader,
    page_id: PageId,
    is_dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame: &'a FrameHeader, page_id: PageId) -> Self {
        Self {
            bpm,
            frame,
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Momentary shared access to the page bytes.
    pub fn data(&self) -> RwLockReadGuard<'_, PageBytes> {
        self.frame.data.read().unwrap()
    }

    /// Momentary exclusive access to the page bytes; marks the page dirty.
    pub fn data_mut(&mut self) -> RwLockWriteGuard<'_, PageBytes> {
        self.is_dirty = true;
        self.frame.data.write().unwrap()
    }

    /// Takes the shared page latch, transferring the pin to a read guard.
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        let this = ManuallyDrop::new(self);
        let (bpm, frame, page_id) = (this.bpm, this.frame, this.page_id);
        if this.is_dirty {
            frame.is_dirty.store(true, Ordering::Release);
        }
        let data = frame.data.read().unwrap();
        ReadPageGuard::new(bpm, page_id, data)
    }

    /// Takes the exclusive page latch, transferring the pin to a write guard.
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        let this = ManuallyDrop::new(self);
        let (bpm, frame, page_id) = (this.bpm, this.frame, this.page_id);
        if this.is_dirty {
            frame.is_dirty.store(true, Ordering::Release);
        }
        let data = frame.data.write().unwrap();
        WritePageGuard::new(bpm, page_id, data)
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// Scoped handle holding the shared page latch for its whole lifetime.
/// Dropping releases the latch, then unpins without dirtying the page.
pub struct ReadPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    data: Option<RwLockReadGuard<'a, PageBytes>>,
}

impl<'a> ReadPageGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        page_id: PageId,
        data: RwLockReadGuard<'a, PageBytes>,
    ) -> Self {
        Self {
            bpm,
            page_id,
            data: Some(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        let data = self.data.as_ref().expect("page latch held for guard lifetime");
        &data[..]
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Latch released before the unpin takes the pool latch.
        self.data.take();
        self.bpm.unpin_page(self.page_id, false);
    }
}

/// Scoped handle holding the exclusive page latch for its whole lifetime.
/// Dropping releases the latch, then unpins with the dirty flag set.
pub struct WritePageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    data: Option<RwLockWriteGuard<'a, PageBytes>>,
}

impl<'a> WritePageGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        page_id: PageId,
        data: RwLockWriteGuard<'a, PageBytes>,
    ) -> Self {
        Self {
            bpm,
            page_id,
            data: Some(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        let data = self.data.as_ref().expect("page latch held for guard lifetime");
        &data[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let data = self.data.as_mut().expect("page latch held for guard lifetime");
        &mut data[..]
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.data.take();
        self.bpm.unpin_page(self.page_id, true);
    }
}
