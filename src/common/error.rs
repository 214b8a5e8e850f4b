use thiserror::Error;

use crate::common::config::{FrameId, PageId, Timestamp, TxnId};
use crate::common::rid::Rid;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk request for page {0} failed")]
    DiskRequestFailed(PageId),

    #[error("page {0} has not been allocated")]
    PageNotAllocated(PageId),

    #[error("buffer pool exhausted, every frame is pinned")]
    PoolExhausted,

    #[error("frame id {0} is beyond the replacer capacity")]
    InvalidFrameId(FrameId),

    #[error("frame {0} is not evictable")]
    FrameNotEvictable(FrameId),

    #[error("directory page is at max depth")]
    DirectoryFull,

    #[error("requested depth {requested} exceeds the page limit {limit}")]
    InvalidDepth { requested: u32, limit: u32 },

    #[error("bucket max size {requested} exceeds the page capacity {limit}")]
    BucketSizeTooLarge { requested: u32, limit: usize },

    #[error("tuple does not fit in a table page")]
    TupleTooLarge,

    #[error("malformed tuple or page payload")]
    Corrupted,

    #[error("rid {0} does not resolve to a tuple")]
    InvalidRid(Rid),

    #[error("read ts {read_ts} is below the last commit ts {commit_ts}")]
    ReadTsTooOld {
        read_ts: Timestamp,
        commit_ts: Timestamp,
    },

    #[error("transaction {0} is not in the state the operation requires")]
    InvalidTxnState(TxnId),

    #[error("transaction {txn_id} lost a write-write conflict on {rid}")]
    WriteConflict { txn_id: TxnId, rid: Rid },

    #[error("unknown table oid {0}")]
    UnknownTable(u32),
}
