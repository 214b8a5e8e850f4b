use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, warn};

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::{PageId, HASH_DIRECTORY_MAX_DEPTH, INVALID_PAGE_ID};
use crate::common::error::{Result, StorageError};
use crate::index::hash::bucket_page::HashTableBucketPage;
use crate::index::hash::codec::FixedCodec;
use crate::index::hash::directory_page::HashTableDirectoryPage;
use crate::index::hash::hash_function::{DefaultHashFunction, HashFunction};
use crate::index::hash::header_page::HashTableHeaderPage;
use crate::storage::page::page_guard::WritePageGuard;

/// Disk-backed extendible hash table. Point lookups resolve a 32-bit key
/// hash through a header page, a directory page and a bucket page, all
/// fetched through the buffer pool under page latches.
///
/// Latching follows header, then directory, then bucket. Inserts keep the
/// directory latched exclusively through the whole split loop; removes do
/// the same through the merge loop, so sibling merges within one directory
/// are serialised by the directory latch.
pub struct DiskExtendibleHashTable<K, V, H = DefaultHashFunction> {
    bpm: Arc<BufferPoolManager>,
    hash_fn: H,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, H> DiskExtendibleHashTable<K, V, H>
where
    K: FixedCodec + Ord + Clone,
    V: FixedCodec + Clone,
    H: HashFunction<K>,
{
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        hash_fn: H,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> Result<Self> {
        let bucket_limit = HashTableBucketPage::<K, V>::max_entries();
        if bucket_max_size as usize > bucket_limit {
            return Err(StorageError::BucketSizeTooLarge {
                requested: bucket_max_size,
                limit: bucket_limit,
            });
        }
        if directory_max_depth > HASH_DIRECTORY_MAX_DEPTH {
            return Err(StorageError::InvalidDepth {
                requested: directory_max_depth,
                limit: HASH_DIRECTORY_MAX_DEPTH,
            });
        }
        let header = HashTableHeaderPage::init(header_max_depth)?;

        let header_page_id;
        {
            let guard = bpm.new_page()?;
            header_page_id = guard.page_id();
            let mut header_guard = guard.upgrade_write();
            header.encode(header_guard.data_mut())?;
        }

        Ok(Self {
            bpm,
            hash_fn,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            _marker: PhantomData,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Global depth of the directory at a header slot, if allocated.
    pub fn global_depth_of(&self, directory_idx: usize) -> Result<Option<u32>> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let header = HashTableHeaderPage::decode(header_guard.data())?;
        let directory_page_id = header.directory_page_id(directory_idx);
        drop(header_guard);
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let directory_guard = self.bpm.fetch_page_read(directory_page_id)?;
        let directory = HashTableDirectoryPage::decode(directory_guard.data())?;
        Ok(Some(directory.global_depth()))
    }

    /// Walks every allocated directory and asserts its invariants.
    pub fn verify_integrity(&self) -> Result<()> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let header = HashTableHeaderPage::decode(header_guard.data())?;
        for directory_idx in 0..header.max_size() {
            let directory_page_id = header.directory_page_id(directory_idx);
            if directory_page_id == INVALID_PAGE_ID {
                continue;
            }
            let directory_guard = self.bpm.fetch_page_read(directory_page_id)?;
            let directory = HashTableDirectoryPage::decode(directory_guard.data())?;
            directory.verify_integrity();
        }
        Ok(())
    }

    fn hash(&self, key: &K) -> u32 {
        self.hash_fn.hash_key(key)
    }

    pub fn lookup(&self, key: &K) -> Result<Option<V>> {
        let hash = self.hash(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let header = HashTableHeaderPage::decode(header_guard.data())?;
        let directory_page_id = header.directory_page_id(header.hash_to_directory_index(hash));
        drop(header_guard);

        if directory_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let directory_guard = self.bpm.fetch_page_read(directory_page_id)?;
        let directory = HashTableDirectoryPage::decode(directory_guard.data())?;
        let bucket_page_id = directory.bucket_page_id(directory.hash_to_bucket_index(hash));
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let bucket_guard = self.bpm.fetch_page_read(bucket_page_id)?;
        drop(directory_guard);
        let bucket = HashTableBucketPage::<K, V>::decode(bucket_guard.data())?;
        Ok(bucket.lookup(key).cloned())
    }

    /// Inserts a key value pair, splitting buckets and growing the directory
    /// as needed. Returns false on a duplicate key or when the directory has
    /// reached its maximum depth.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        let hash = self.hash(&key);

        let mut header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let mut header = HashTableHeaderPage::decode(header_guard.data())?;
        let directory_idx = header.hash_to_directory_index(hash);
        let directory_page_id = header.directory_page_id(directory_idx);

        if directory_page_id == INVALID_PAGE_ID {
            return self.insert_to_new_directory(
                &mut header_guard,
                &mut header,
                directory_idx,
                hash,
                key,
                value,
            );
        }
        drop(header_guard);

        let mut directory_guard = self.bpm.fetch_page_write(directory_page_id)?;
        let mut directory = HashTableDirectoryPage::decode(directory_guard.data())?;
        let mut bucket_idx = directory.hash_to_bucket_index(hash);
        let mut bucket_page_id = directory.bucket_page_id(bucket_idx);

        if bucket_page_id == INVALID_PAGE_ID {
            let inserted = self.insert_to_new_bucket(&mut directory, bucket_idx, key, value)?;
            directory.encode(directory_guard.data_mut())?;
            return Ok(inserted);
        }

        let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
        let mut bucket = HashTableBucketPage::<K, V>::decode(bucket_guard.data())?;

        if bucket.lookup(&key).is_some() {
            return Ok(false);
        }
        if bucket.insert(key.clone(), value.clone()) {
            bucket.encode(bucket_guard.data_mut())?;
            return Ok(true);
        }

        // Bucket overflow. Split until the incoming key fits; every pass
        // either grows the directory or halves one bucket's key range.
        loop {
            if directory.local_depth(bucket_idx) == directory.global_depth() {
                if directory.global_depth() >= self.directory_max_depth {
                    warn!("directory is at max depth {}, rejecting insert", self.directory_max_depth);
                    directory.encode(directory_guard.data_mut())?;
                    return Ok(false);
                }
                directory.incr_global_depth()?;
            }

            let mut image_bucket = match HashTableBucketPage::<K, V>::init(self.bucket_max_size) {
                Ok(bucket) => bucket,
                Err(err) => {
                    directory.encode(directory_guard.data_mut())?;
                    return Err(err);
                }
            };
            let image_basic = match self.bpm.new_page() {
                Ok(guard) => guard,
                Err(err) => {
                    directory.encode(directory_guard.data_mut())?;
                    return Err(err);
                }
            };
            let image_page_id = image_basic.page_id();
            let mut image_guard = image_basic.upgrade_write();

            let local_depth = directory.local_depth(bucket_idx);
            let local_mask = directory.local_depth_mask(bucket_idx);
            let high_bit = 1u32 << local_depth;
            let image_idx = directory.split_image_index(bucket_idx);

            // Every slot of the old group bumps its local depth; the half on
            // the image side retargets to the new bucket.
            let mut idx = bucket_idx as u32 & local_mask;
            while (idx as usize) < directory.size() {
                if idx & high_bit == image_idx as u32 & high_bit {
                    directory.set_bucket_page_id(idx as usize, image_page_id);
                }
                directory.set_local_depth(idx as usize, (local_depth + 1) as u8);
                idx += high_bit;
            }

            debug!(
                "split bucket page {bucket_page_id} at index {bucket_idx:#b}, image page {image_page_id}"
            );

            for (k, v) in bucket.take_entries() {
                let target_idx = directory.hash_to_bucket_index(self.hash(&k));
                let target_page_id = directory.bucket_page_id(target_idx);
                debug_assert!(target_page_id == bucket_page_id || target_page_id == image_page_id);
                if target_page_id == image_page_id {
                    image_bucket.insert(k, v);
                } else {
                    bucket.insert(k, v);
                }
            }
            bucket.encode(bucket_guard.data_mut())?;
            image_bucket.encode(image_guard.data_mut())?;
            drop(image_guard);
            drop(bucket_guard);

            // A grow may have moved the key's slot; resolve it again. The
            // directory image goes out before any error so the published
            // bucket contents stay reachable.
            bucket_idx = directory.hash_to_bucket_index(hash);
            bucket_page_id = directory.bucket_page_id(bucket_idx);
            bucket_guard = match self.bpm.fetch_page_write(bucket_page_id) {
                Ok(guard) => guard,
                Err(err) => {
                    directory.encode(directory_guard.data_mut())?;
                    return Err(err);
                }
            };
            bucket = match HashTableBucketPage::<K, V>::decode(bucket_guard.data()) {
                Ok(bucket) => bucket,
                Err(err) => {
                    directory.encode(directory_guard.data_mut())?;
                    return Err(err);
                }
            };

            if bucket.insert(key.clone(), value.clone()) {
                bucket.encode(bucket_guard.data_mut())?;
                directory.encode(directory_guard.data_mut())?;
                return Ok(true);
            }
        }
    }

    /// Removes a key, merging emptied buckets with their split images and
    /// shrinking the directory when every local depth allows it.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let hash = self.hash(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let header = HashTableHeaderPage::decode(header_guard.data())?;
        let directory_page_id = header.directory_page_id(header.hash_to_directory_index(hash));
        drop(header_guard);

        if directory_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let mut directory_guard = self.bpm.fetch_page_write(directory_page_id)?;
        let mut directory = HashTableDirectoryPage::decode(directory_guard.data())?;
        let bucket_idx = directory.hash_to_bucket_index(hash);
        let bucket_page_id = directory.bucket_page_id(bucket_idx);
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
        let mut bucket = HashTableBucketPage::<K, V>::decode(bucket_guard.data())?;
        if !bucket.remove(key) {
            return Ok(false);
        }
        bucket.encode(bucket_guard.data_mut())?;

        if bucket.is_empty() {
            // Merge chain: fold the emptied bucket into its split image and
            // keep folding while a sibling at the same local depth is empty.
            loop {
                let local_depth = directory.local_depth(bucket_idx);
                if local_depth == 0 {
                    break;
                }
                let image_idx = bucket_idx ^ (1usize << (local_depth - 1));
                if directory.local_depth(image_idx) != local_depth {
                    break;
                }
                let image_page_id = directory.bucket_page_id(image_idx);
                if image_page_id == bucket_page_id {
                    break;
                }

                let mut image_guard = match self.bpm.fetch_page_write(image_page_id) {
                    Ok(guard) => guard,
                    Err(err) => {
                        directory.encode(directory_guard.data_mut())?;
                        return Err(err);
                    }
                };
                let mut image_bucket = match HashTableBucketPage::<K, V>::decode(image_guard.data())
                {
                    Ok(bucket) => bucket,
                    Err(err) => {
                        drop(image_guard);
                        directory.encode(directory_guard.data_mut())?;
                        return Err(err);
                    }
                };
                if !image_bucket.is_empty() && !bucket.is_empty() {
                    break;
                }

                for (k, v) in image_bucket.take_entries() {
                    bucket.insert(k, v);
                }
                image_bucket.encode(image_guard.data_mut())?;
                drop(image_guard);

                let merged_mask = directory.local_depth_mask(bucket_idx) >> 1;
                let merged_step = 1u32 << (local_depth - 1);
                let mut idx = bucket_idx as u32 & merged_mask;
                while (idx as usize) < directory.size() {
                    directory.set_bucket_page_id(idx as usize, bucket_page_id);
                    directory.decr_local_depth(idx as usize);
                    idx += merged_step;
                }
                bucket.encode(bucket_guard.data_mut())?;

                match self.bpm.delete_page(image_page_id) {
                    Ok(true) => debug!(
                        "merged bucket index {image_idx:#b} into {bucket_idx:#b}, freed page {image_page_id}"
                    ),
                    Ok(false) => warn!("merged bucket page {image_page_id} is still pinned"),
                    Err(err) => warn!("failed to free merged bucket page {image_page_id}: {err}"),
                }
            }

            while directory.can_shrink() {
                directory.decr_global_depth();
            }
            directory.encode(directory_guard.data_mut())?;
        }

        Ok(true)
    }

    fn insert_to_new_directory(
        &self,
        header_guard: &mut WritePageGuard<'_>,
        header: &mut HashTableHeaderPage,
        directory_idx: usize,
        hash: u32,
        key: K,
        value: V,
    ) -> Result<bool> {
        let mut directory = HashTableDirectoryPage::init(self.directory_max_depth)?;
        let directory_basic = self.bpm.new_page()?;
        let directory_page_id = directory_basic.page_id();
        let mut directory_guard = directory_basic.upgrade_write();

        let bucket_idx = directory.hash_to_bucket_index(hash);
        match self.insert_to_new_bucket(&mut directory, bucket_idx, key, value) {
            Ok(true) => {
                directory.encode(directory_guard.data_mut())?;
                drop(directory_guard);
                header.set_directory_page_id(directory_idx, directory_page_id);
                header.encode(header_guard.data_mut())?;
                debug!("created directory page {directory_page_id} at header index {directory_idx}");
                Ok(true)
            }
            other => {
                drop(directory_guard);
                if let Err(err) = self.bpm.delete_page(directory_page_id) {
                    warn!("failed to drop unused directory page {directory_page_id}: {err}");
                }
                other
            }
        }
    }

    fn insert_to_new_bucket(
        &self,
        directory: &mut HashTableDirectoryPage,
        bucket_idx: usize,
        key: K,
        value: V,
    ) -> Result<bool> {
        let mut bucket = HashTableBucketPage::<K, V>::init(self.bucket_max_size)?;
        let bucket_basic = self.bpm.new_page()?;
        let bucket_page_id = bucket_basic.page_id();
        let mut bucket_guard = bucket_basic.upgrade_write();

        bucket.insert(key, value);
        bucket.encode(bucket_guard.data_mut())?;

        directory.set_bucket_page_id(bucket_idx, bucket_page_id);
        directory.set_local_depth(bucket_idx, 0);
        debug!("created bucket page {bucket_page_id} at directory index {bucket_idx}");
        Ok(true)
    }
}
