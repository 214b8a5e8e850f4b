//! Crate-wide identifiers, sentinels and sizing constants.

pub type PageId = u32;
pub type FrameId = usize;
pub type TxnId = u64;
pub type Timestamp = u64;
pub type TableOid = u32;

pub const PAGE_SIZE: usize = 4096;

pub const INVALID_PAGE_ID: PageId = u32::MAX;
pub const INVALID_TXN_ID: TxnId = 0;
pub const INVALID_TIMESTAMP: Timestamp = u64::MAX;

/// High-bit marker separating transaction temp timestamps from commit
/// timestamps. A tuple whose metadata timestamp carries this bit is an
/// uncommitted write owned by transaction `ts ^ TXN_START_ID`.
pub const TXN_START_ID: Timestamp = 1 << 62;

pub const BUFFER_POOL_SIZE: usize = 128;
pub const LRUK_REPLACER_K: usize = 10;

pub const HASH_HEADER_MAX_DEPTH: u32 = 9;
pub const HASH_DIRECTORY_MAX_DEPTH: u32 = 9;

/// True for commit timestamps, false for transaction temp stamps.
pub fn is_committed_ts(ts: Timestamp) -> bool {
    ts < TXN_START_ID
}

/// Owner of a temp timestamp.
pub fn temp_ts_to_txn_id(ts: Timestamp) -> TxnId {
    ts ^ TXN_START_ID
}
