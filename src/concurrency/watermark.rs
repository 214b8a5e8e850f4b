use std::collections::BTreeMap;
use std::sync::RwLock;

use log::warn;

use crate::common::config::Timestamp;
use crate::common::error::{Result, StorageError};

struct WatermarkInner {
    commit_ts: Timestamp,
    // Reference counted active read timestamps; several transactions may
    // share one snapshot.
    current_reads: BTreeMap<Timestamp, usize>,
}

/// Tracks the oldest snapshot any live transaction can still observe.
/// The watermark is the smallest active read timestamp, or the last commit
/// timestamp once no reader is live. Queries are frequent, so the state
/// sits behind a shared latch.
pub struct Watermark {
    inner: RwLock<WatermarkInner>,
}

impl Watermark {
    pub fn new(commit_ts: Timestamp) -> Self {
        Self {
            inner: RwLock::new(WatermarkInner {
                commit_ts,
                current_reads: BTreeMap::new(),
            }),
        }
    }

    /// Registers a transaction's read timestamp. Rejects timestamps behind
    /// the current commit timestamp.
    pub fn add_txn(&self, read_ts: Timestamp) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if read_ts < inner.commit_ts {
            return Err(StorageError::ReadTsTooOld {
                read_ts,
                commit_ts: inner.commit_ts,
            });
        }
        *inner.current_reads.entry(read_ts).or_insert(0) += 1;
        Ok(())
    }

    pub fn remove_txn(&self, read_ts: Timestamp) {
        let mut inner = self.inner.write().unwrap();
        match inner.current_reads.get_mut(&read_ts) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                inner.current_reads.remove(&read_ts);
            }
            None => warn!("removal of unregistered read ts {read_ts}"),
        }
    }

    pub fn update_commit_ts(&self, commit_ts: Timestamp) {
        let mut inner = self.inner.write().unwrap();
        inner.commit_ts = commit_ts;
    }

    pub fn watermark(&self) -> Timestamp {
        let inner = self.inner.read().unwrap();
        inner
            .current_reads
            .keys()
            .next()
            .copied()
            .unwrap_or(inner.commit_ts)
    }
}
