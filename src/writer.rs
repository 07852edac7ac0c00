//! Ledger Writer
//!
//! The one write entry point for a chain: creates an entry and persists it
//! under a single lock so store order always matches chain order. Opening a
//! writer re-seeds the cursor from the store tail, so a restarted process
//! continues the existing chain instead of starting a new genesis.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{EntryRequest, LedgerEntry};
use crate::ledger::seal::Sealer;
use crate::ledger::service::{LedgerCursor, LedgerService};
use crate::ledger::verify::{BatchReport, BatchVerifier};
use crate::store::{LedgerStore, ReadRange};

pub struct LedgerWriter {
    service: Arc<LedgerService>,
    store: Arc<dyn LedgerStore>,
    write_lock: Mutex<()>,
}

impl LedgerWriter {
    /// Bind `service` to `store`, seeding the cursor from the store's last entry.
    ///
    /// From here on the writer owns `service`'s cursor: `record` is the only
    /// caller of `create_entry`, since a rolled-back append restores the
    /// cursor it saw before and would discard any entry created around it.
    pub async fn open(service: Arc<LedgerService>, store: Arc<dyn LedgerStore>) -> LedgerResult<Self> {
        let cursor = match store.last_entry().await? {
            Some(tail) => {
                let report = service.verify_integrity(&tail);
                if !report.is_valid {
                    warn!(
                        "Ledger tail #{} fails integrity check, chaining onto it anyway: {:?}",
                        tail.sequence_number, report.errors
                    );
                }
                info!(
                    "Resuming ledger chain after #{} ({})",
                    tail.sequence_number,
                    tail.summary()
                );
                LedgerCursor::after(&tail)
            }
            None => {
                info!("Ledger store is empty, starting a new chain at genesis");
                LedgerCursor::genesis()
            }
        };
        service.seed(cursor);

        let writer = Self {
            service,
            store,
            write_lock: Mutex::new(()),
        };
        writer.ensure_synced().await?;
        Ok(writer)
    }

    /// Current chain position
    pub fn cursor(&self) -> LedgerCursor {
        self.service.cursor()
    }

    pub fn sealer(&self) -> &Sealer {
        self.service.sealer()
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Fail with `CursorDesync` if the cursor doesn't sit on the store tail
    pub async fn ensure_synced(&self) -> LedgerResult<()> {
        let _guard = self.write_lock.lock().await;
        let cursor = self.service.cursor();
        let tail = self.store.last_entry().await?;

        let (store_sequence, store_hash) = match &tail {
            Some(entry) => (entry.sequence_number, Some(entry.log_hash.as_str())),
            None => (0, None),
        };

        if cursor.sequence != store_sequence || cursor.last_hash.as_deref() != store_hash {
            error!(
                "Ledger cursor at #{} does not match store tail #{}",
                cursor.sequence, store_sequence
            );
            return Err(LedgerError::CursorDesync {
                cursor_sequence: cursor.sequence,
                store_sequence,
            });
        }
        Ok(())
    }

    /// Create and persist an entry.
    ///
    /// If the store rejects the append the cursor is rolled back, so the
    /// next entry still links to the last persisted one.
    pub async fn record(&self, request: EntryRequest) -> LedgerResult<LedgerEntry> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.service.cursor();
        let entry = self.service.create_entry(request);

        match self.store.append(&entry).await {
            Ok(()) => Ok(entry),
            Err(e) => {
                self.service.seed(snapshot);
                Err(e)
            }
        }
    }

    /// Record an entry on the response path: failures are logged, never
    /// propagated.
    pub async fn record_or_log(&self, request: EntryRequest) -> Option<LedgerEntry> {
        let request_id = request.request_id.clone();
        match self.record(request).await {
            Ok(entry) => Some(entry),
            Err(e) => {
                error!("Dropping ledger entry for request {}: {}", request_id, e);
                None
            }
        }
    }

    /// Batch-verify one window of the chain
    pub async fn verify_range(&self, range: ReadRange) -> LedgerResult<BatchReport> {
        let entries = self.store.read_range(range).await?;
        Ok(self.service.verify_chain_batch(&entries))
    }

    /// Verify the whole stored chain page by page.
    ///
    /// The verifier carries the last entry of each page into the next, so
    /// links across page boundaries are checked too.
    pub async fn verify_all(&self, page_size: u64) -> LedgerResult<BatchReport> {
        let page_size = page_size.max(1);
        let mut verifier = BatchVerifier::new(self.service.sealer());
        let mut offset = 0;

        loop {
            let page = self.store.read_range(ReadRange::new(offset, page_size)).await?;
            let fetched = page.len() as u64;
            verifier.extend(&page);
            if fetched < page_size {
                break;
            }
            offset += fetched;
        }

        let report = verifier.finish();
        info!("{}", report.summary());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;

    const SECRET: &str = "writer-test-secret-that-is-long-enough";

    fn request(id: &str) -> EntryRequest {
        EntryRequest::new(id, "user", "/v1/chat/completions", "POST", 200, 5.5)
    }

    async fn writer_with(store: Arc<MemoryLedgerStore>) -> LedgerWriter {
        LedgerWriter::open(Arc::new(LedgerService::new(SECRET)), store)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_persists_chain() {
        let store = Arc::new(MemoryLedgerStore::new());
        let writer = writer_with(store.clone()).await;

        let first = writer.record(request("a")).await.unwrap();
        let second = writer.record(request("b")).await.unwrap();

        assert!(first.is_genesis());
        assert_eq!(second.chain_hash.as_deref(), Some(first.log_hash.as_str()));
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(writer.verify_all(10).await.unwrap().all_valid);
    }

    #[tokio::test]
    async fn test_conflict_rolls_back_cursor() {
        let store = Arc::new(MemoryLedgerStore::new());
        let writer = writer_with(store.clone()).await;

        let first = writer.record(request("same")).await.unwrap();
        let err = writer.record(request("same")).await.unwrap_err();
        assert!(err.is_conflict());

        let next = writer.record(request("other")).await.unwrap();
        assert_eq!(next.sequence_number, 2);
        assert_eq!(next.chain_hash.as_deref(), Some(first.log_hash.as_str()));
        writer.ensure_synced().await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_follows_recorded_entries() {
        let store = Arc::new(MemoryLedgerStore::new());
        let writer = writer_with(store).await;
        assert!(writer.cursor().is_genesis());

        let entry = writer.record(request("c")).await.unwrap();
        let cursor = writer.cursor();
        assert_eq!(cursor.sequence, 1);
        assert_eq!(cursor.last_hash.as_deref(), Some(entry.log_hash.as_str()));
        assert!(writer.sealer().verify_signature(&entry.log_hash, None, &entry.signature));
    }

    #[tokio::test]
    async fn test_record_or_log_swallows_errors() {
        let store = Arc::new(MemoryLedgerStore::new());
        let writer = writer_with(store).await;

        assert!(writer.record_or_log(request("x")).await.is_some());
        assert!(writer.record_or_log(request("x")).await.is_none());
    }

    #[tokio::test]
    async fn test_reopen_resumes_from_tail() {
        let store = Arc::new(MemoryLedgerStore::new());
        let tail = {
            let writer = writer_with(store.clone()).await;
            writer.record(request("one")).await.unwrap();
            writer.record(request("two")).await.unwrap()
        };

        let reopened = writer_with(store.clone()).await;
        let next = reopened.record(request("three")).await.unwrap();
        assert_eq!(next.sequence_number, 3);
        assert_eq!(next.chain_hash.as_deref(), Some(tail.log_hash.as_str()));
        assert!(reopened.verify_all(2).await.unwrap().all_valid);
    }

    #[tokio::test]
    async fn test_desync_detected() {
        let store = Arc::new(MemoryLedgerStore::new());
        let writer = writer_with(store.clone()).await;
        writer.record(request("one")).await.unwrap();

        writer.service.seed(LedgerCursor::genesis());
        let err = writer.ensure_synced().await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::CursorDesync {
                cursor_sequence: 0,
                store_sequence: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_verify_all_spans_pages() {
        let store = Arc::new(MemoryLedgerStore::new());
        let writer = writer_with(store.clone()).await;
        for i in 0..7 {
            writer.record(request(&format!("p-{}", i))).await.unwrap();
        }

        let report = writer.verify_all(3).await.unwrap();
        assert!(report.all_valid);
        assert_eq!(report.entries_checked, 7);

        assert!(store.delete_by_request_id("p-3").await.unwrap());
        let report = writer.verify_all(3).await.unwrap();
        assert!(!report.all_valid);
        assert_eq!(report.entries_checked, 6);
        assert!(report.individual_failures.is_empty());
        assert_eq!(report.chain_failures.len(), 1);
        assert_eq!(report.chain_failures[0].previous_sequence, 3);
        assert_eq!(report.chain_failures[0].current_sequence, 5);
    }

    #[tokio::test]
    async fn test_concurrent_records_form_one_chain() {
        let store = Arc::new(MemoryLedgerStore::new());
        let writer = Arc::new(writer_with(store.clone()).await);

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let writer = Arc::clone(&writer);
                tokio::spawn(async move { writer.record(request(&format!("c-{}", i))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let report = writer.verify_range(ReadRange::first(100)).await.unwrap();
        assert!(report.all_valid);
        assert_eq!(report.entries_checked, 20);
    }
}
