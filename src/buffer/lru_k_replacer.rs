use std::collections::{HashMap, VecDeque};

use crate::common::config::FrameId;
use crate::common::error::{Result, StorageError};

pub trait Replacer {
    fn evict(&mut self) -> Option<FrameId>;
    fn record_access(&mut self, frame_id: FrameId) -> Result<()>;
    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) -> Result<()>;
    fn remove(&mut self, frame_id: FrameId) -> Result<()>;
    fn size(&self) -> usize;
}

struct LruKNode {
    // Oldest retained access first; at most k entries are kept, so the front
    // is the k-th most recent access once the node has k of them.
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LruKNode {
    fn new(timestamp: u64) -> Self {
        let mut history = VecDeque::new();
        history.push_back(timestamp);
        Self {
            history,
            is_evictable: false,
        }
    }

    fn record(&mut self, timestamp: u64, k: usize) {
        self.history.push_back(timestamp);
        if self.history.len() > k {
            self.history.pop_front();
        }
    }

    fn earliest(&self) -> u64 {
        *self.history.front().expect("history is never empty")
    }
}

/// Picks eviction victims by backward k-distance. Frames with fewer than k
/// recorded accesses count as infinite distance and are preferred, oldest
/// first; otherwise the frame whose k-th most recent access is oldest wins.
pub struct LruKReplacer {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    evictable_count: usize,
    replacer_size: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            node_store: HashMap::with_capacity(num_frames),
            current_timestamp: 0,
            evictable_count: 0,
            replacer_size: num_frames,
            k,
        }
    }
}

impl Replacer for LruKReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        if self.evictable_count == 0 {
            return None;
        }

        let mut victim: Option<FrameId> = None;
        let mut victim_has_full_history = true;
        let mut victim_earliest = u64::MAX;

        for (&frame_id, node) in &self.node_store {
            if !node.is_evictable {
                continue;
            }
            let has_full_history = node.history.len() >= self.k;
            let earliest = node.earliest();

            // Infinite k-distance beats finite; within a class the oldest
            // earliest access wins.
            let better = match (has_full_history, victim_has_full_history) {
                (false, true) => true,
                (true, false) => false,
                _ => earliest < victim_earliest,
            };
            if victim.is_none() || better {
                victim = Some(frame_id);
                victim_has_full_history = has_full_history;
                victim_earliest = earliest;
            }
        }

        let frame_id = victim?;
        self.node_store.remove(&frame_id);
        self.evictable_count -= 1;
        Some(frame_id)
    }

    fn record_access(&mut self, frame_id: FrameId) -> Result<()> {
        if frame_id >= self.replacer_size {
            return Err(StorageError::InvalidFrameId(frame_id));
        }
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;
        match self.node_store.get_mut(&frame_id) {
            Some(node) => node.record(timestamp, self.k),
            None => {
                self.node_store.insert(frame_id, LruKNode::new(timestamp));
            }
        }
        Ok(())
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) -> Result<()> {
        if frame_id >= self.replacer_size {
            return Err(StorageError::InvalidFrameId(frame_id));
        }
        let node = match self.node_store.get_mut(&frame_id) {
            Some(node) => node,
            None => return Ok(()),
        };
        if node.is_evictable != evictable {
            node.is_evictable = evictable;
            if evictable {
                self.evictable_count += 1;
            } else {
                self.evictable_count -= 1;
            }
        }
        Ok(())
    }

    fn remove(&mut self, frame_id: FrameId) -> Result<()> {
        match self.node_store.get(&frame_id) {
            Some(node) if !node.is_evictable => Err(StorageError::FrameNotEvictable(frame_id)),
            Some(_) => {
                self.node_store.remove(&frame_id);
                self.evictable_count -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn size(&self) -> usize {
        self.evictable_count
    }
}
