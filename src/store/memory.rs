//! In-memory ledger store
//!
//! Keeps entries sorted by sequence number. There is no update API; the
//! only mutation besides append is the policy-gated delete.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::LedgerEntry;
use crate::store::policy::DeletePolicy;
use crate::store::{LedgerStore, ReadRange};

#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    entries: RwLock<Vec<LedgerEntry>>,
    delete_policy: DeletePolicy,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delete_policy(delete_policy: DeletePolicy) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            delete_policy,
        }
    }

    /// Remove the entry for `request_id`; returns whether a row was removed.
    pub async fn delete_by_request_id(&self, request_id: &str) -> LedgerResult<bool> {
        if self.delete_policy == DeletePolicy::Block {
            return Err(LedgerError::Database(
                "Ledger entries cannot be deleted".to_string(),
            ));
        }

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.request_id != request_id);
        Ok(entries.len() != before)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append(&self, entry: &LedgerEntry) -> LedgerResult<()> {
        let mut entries = self.entries.write().await;

        for existing in entries.iter() {
            if existing.id == entry.id {
                return Err(LedgerError::duplicate("id", &entry.id));
            }
            if existing.request_id == entry.request_id {
                return Err(LedgerError::duplicate("request_id", &entry.request_id));
            }
            if existing.log_hash == entry.log_hash {
                return Err(LedgerError::duplicate("log_hash", &entry.log_hash));
            }
        }

        match entries.binary_search_by_key(&entry.sequence_number, |e| e.sequence_number) {
            Ok(_) => Err(LedgerError::duplicate(
                "sequence_number",
                &entry.sequence_number.to_string(),
            )),
            Err(position) => {
                entries.insert(position, entry.clone());
                debug!("Stored ledger entry {}", entry.summary());
                Ok(())
            }
        }
    }

    async fn read_range(&self, range: ReadRange) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .skip(usize::try_from(range.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(range.limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: u64) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn last_entry(&self) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self.entries.read().await.last().cloned())
    }

    async fn find_by_request_id(&self, request_id: &str) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .find(|e| e.request_id == request_id)
            .cloned())
    }

    async fn count(&self) -> LedgerResult<u64> {
        Ok(self.entries.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::EntryRequest;
    use crate::ledger::service::LedgerService;

    fn entries(count: usize) -> Vec<LedgerEntry> {
        let svc = LedgerService::new("memory-store-secret");
        (0..count)
            .map(|i| svc.create_entry(EntryRequest::new(format!("req-{}", i), "u", "/x", "GET", 200, 1.0)))
            .collect()
    }

    #[tokio::test]
    async fn test_append_keeps_sequence_order() {
        let store = MemoryLedgerStore::new();
        let created = entries(4);
        for entry in created.iter().rev() {
            store.append(entry).await.unwrap();
        }

        let read = store.read_range(ReadRange::first(10)).await.unwrap();
        let sequences: Vec<u64> = read.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(store.count().await.unwrap(), 4);
        assert_eq!(store.last_entry().await.unwrap().unwrap().sequence_number, 4);
    }

    #[tokio::test]
    async fn test_duplicate_request_id_conflicts() {
        let store = MemoryLedgerStore::new();
        let created = entries(2);
        store.append(&created[0]).await.unwrap();

        let mut dup = created[1].clone();
        dup.request_id = created[0].request_id.clone();
        let err = store.append(&dup).await.unwrap_err();
        assert!(err.is_conflict());

        let err = store.append(&created[0]).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_range_and_recent() {
        let store = MemoryLedgerStore::new();
        for entry in entries(5) {
            store.append(&entry).await.unwrap();
        }

        let page = store.read_range(ReadRange::new(1, 2)).await.unwrap();
        assert_eq!(page.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![2, 3]);

        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![5, 4]);

        assert!(store.find_by_request_id("req-3").await.unwrap().is_some());
        assert!(store.find_by_request_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_respects_policy() {
        let open = MemoryLedgerStore::new();
        let blocked = MemoryLedgerStore::with_delete_policy(DeletePolicy::Block);
        for entry in entries(2) {
            open.append(&entry).await.unwrap();
            blocked.append(&entry).await.unwrap();
        }

        assert!(open.delete_by_request_id("req-0").await.unwrap());
        assert!(!open.delete_by_request_id("req-0").await.unwrap());
        assert_eq!(open.count().await.unwrap(), 1);

        assert!(blocked.delete_by_request_id("req-0").await.is_err());
        assert_eq!(blocked.count().await.unwrap(), 2);
    }
}
