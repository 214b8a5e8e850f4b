use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::common::rid::Rid;
use crate::concurrency::transaction::UndoLink;

/// Per-tuple version chain head plus the write-in-progress marker that
/// serialises first-touch writers on the same rid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionUndoLink {
    pub prev: UndoLink,
    pub in_progress: bool,
}

impl VersionUndoLink {
    pub fn new(prev: UndoLink) -> Self {
        Self {
            prev,
            in_progress: false,
        }
    }
}

/// Mapping from rid to the head of its undo chain. Each entry's shard lock
/// is the per-tuple version-link lock; conditional updates run under it.
#[derive(Default)]
pub struct VersionStore {
    links: DashMap<Rid, VersionUndoLink>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self {
            links: DashMap::new(),
        }
    }

    pub fn undo_link(&self, rid: Rid) -> Option<UndoLink> {
        self.links.get(&rid).map(|entry| entry.prev)
    }

    pub fn version_link(&self, rid: Rid) -> Option<VersionUndoLink> {
        self.links.get(&rid).map(|entry| *entry)
    }

    /// Atomically replaces a rid's version link. When a `check` is supplied
    /// it inspects the current value under the entry lock and the update
    /// only happens if it approves.
    pub fn update_version_link<F>(
        &self,
        rid: Rid,
        link: Option<VersionUndoLink>,
        check: Option<F>,
    ) -> bool
    where
        F: FnOnce(Option<&VersionUndoLink>) -> bool,
    {
        match self.links.entry(rid) {
            Entry::Occupied(mut occupied) => {
                if let Some(check) = check {
                    if !check(Some(occupied.get())) {
                        return false;
                    }
                }
                match link {
                    Some(link) => {
                        occupied.insert(link);
                    }
                    None => {
                        occupied.remove();
                    }
                }
                true
            }
            Entry::Vacant(vacant) => {
                if let Some(check) = check {
                    if !check(None) {
                        return false;
                    }
                }
                if let Some(link) = link {
                    vacant.insert(link);
                }
                true
            }
        }
    }

    /// Claims the write-in-progress marker, preserving the stored chain
    /// head. Fails if another writer holds it.
    pub fn try_begin_write(&self, rid: Rid) -> bool {
        match self.links.entry(rid) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().in_progress {
                    false
                } else {
                    occupied.get_mut().in_progress = true;
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(VersionUndoLink {
                    prev: UndoLink::INVALID,
                    in_progress: true,
                });
                true
            }
        }
    }

    /// Publishes a new chain head while the marker is held.
    pub fn set_undo_link(&self, rid: Rid, link: UndoLink) {
        match self.links.entry(rid) {
            Entry::Occupied(mut occupied) => occupied.get_mut().prev = link,
            Entry::Vacant(vacant) => {
                vacant.insert(VersionUndoLink::new(link));
            }
        }
    }

    pub fn unset_in_progress(&self, rid: Rid) {
        if let Some(mut entry) = self.links.get_mut(&rid) {
            entry.in_progress = false;
        }
    }
}
