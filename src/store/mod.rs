//! Ledger Store Adapter
//!
//! Append-only persistence for ledger entries. Stores hand entries back in
//! strict `sequence_number` order and never expose a way to modify a
//! persisted row.

pub mod memory;
pub mod policy;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::LedgerResult;
use crate::ledger::entry::LedgerEntry;

pub use memory::MemoryLedgerStore;
pub use policy::{immutability_sql, DeletePolicy, Dialect};
pub use sqlite::SqliteLedgerStore;

/// Window over the chain in ascending sequence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRange {
    pub offset: u64,
    pub limit: u64,
}

impl ReadRange {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    pub fn first(limit: u64) -> Self {
        Self::new(0, limit)
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a new entry. Duplicate `id`, `request_id`, `log_hash` or
    /// `sequence_number` is a `WriteConflict`.
    async fn append(&self, entry: &LedgerEntry) -> LedgerResult<()>;

    /// Entries ordered by ascending `sequence_number`
    async fn read_range(&self, range: ReadRange) -> LedgerResult<Vec<LedgerEntry>>;

    /// Newest entries first
    async fn recent(&self, limit: u64) -> LedgerResult<Vec<LedgerEntry>>;

    /// Entry with the highest `sequence_number`
    async fn last_entry(&self) -> LedgerResult<Option<LedgerEntry>>;

    async fn find_by_request_id(&self, request_id: &str) -> LedgerResult<Option<LedgerEntry>>;

    async fn count(&self) -> LedgerResult<u64>;
}
