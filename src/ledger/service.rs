//! Ledger Service
//!
//! The single writer for one logical chain. Holds the HMAC secret and the
//! cursor (`last_hash`, `sequence`) and turns request outcomes into sealed,
//! chain-linked entries.

use chrono::{SubsecRound, Utc};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::ledger::entry::{self, short, EntryRequest, LedgerEntry};
use crate::ledger::seal::Sealer;
use crate::ledger::verify::{self, BatchReport, ChainReport, IntegrityReport};

/// Position of the writer in its chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerCursor {
    /// `log_hash` of the most recently created entry, `None` before genesis
    pub last_hash: Option<String>,
    /// Sequence number of the most recently created entry, 0 before genesis
    pub sequence: u64,
}

impl LedgerCursor {
    pub fn genesis() -> Self {
        Self::default()
    }

    /// Cursor positioned right after `tail`
    pub fn after(tail: &LedgerEntry) -> Self {
        Self {
            last_hash: Some(tail.log_hash.clone()),
            sequence: tail.sequence_number,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.last_hash.is_none() && self.sequence == 0
    }
}

/// Entry factory and verifier for one chain.
///
/// `create_entry` serializes on an internal lock, so concurrent callers
/// never share a `chain_hash` or `sequence_number`. Persisting the result is
/// the caller's job; use [`crate::writer::LedgerWriter`] to get create and
/// append under one lock.
#[derive(Debug)]
pub struct LedgerService {
    sealer: Sealer,
    cursor: Mutex<LedgerCursor>,
}

impl LedgerService {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self::with_cursor(secret, LedgerCursor::genesis())
    }

    pub fn with_cursor(secret: impl Into<Vec<u8>>, cursor: LedgerCursor) -> Self {
        Self {
            sealer: Sealer::new(secret),
            cursor: Mutex::new(cursor),
        }
    }

    pub fn sealer(&self) -> &Sealer {
        &self.sealer
    }

    /// Snapshot of the current cursor
    pub fn cursor(&self) -> LedgerCursor {
        self.cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the cursor, e.g. after reading the store tail on startup
    pub fn seed(&self, cursor: LedgerCursor) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = cursor;
    }

    /// Create a sealed entry and advance the cursor.
    pub fn create_entry(&self, request: EntryRequest) -> LedgerEntry {
        let EntryRequest {
            request_id,
            user_id,
            endpoint,
            method,
            status_code,
            latency_ms,
            model,
            prompt_tokens,
            completion_tokens,
            pii,
            request_blocked,
            rate_limited,
            auth_method,
            previous_hash,
        } = request;

        let latency_ms = if latency_ms.is_finite() && latency_ms >= 0.0 {
            latency_ms
        } else {
            warn!(
                "Invalid latency {} for request {}, recording 0.0",
                latency_ms, request_id
            );
            0.0
        };

        let pii = pii.unwrap_or_default();
        let now = Utc::now().trunc_subsecs(6);
        let user_hash = entry::user_hash(&user_id);

        let mut entry = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            request_id,
            timestamp: now,
            created_at: now,
            user_id,
            user_hash,
            endpoint,
            method,
            model,
            status_code,
            latency_ms,
            prompt_tokens: u64::from(prompt_tokens),
            completion_tokens: u64::from(completion_tokens),
            total_tokens: u64::from(prompt_tokens) + u64::from(completion_tokens),
            pii_detected: pii.pii_detected,
            pii_entity_count: pii.entity_count,
            pii_risk_level: pii.risk_level,
            pii_entities: pii.entities,
            request_blocked,
            rate_limited,
            auth_method,
            log_hash: String::new(),
            signature: String::new(),
            chain_hash: None,
            sequence_number: 0,
            archived: false,
            archive_hash: None,
        };

        {
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            entry.chain_hash = previous_hash.or_else(|| cursor.last_hash.clone());
            entry.sequence_number = cursor.sequence + 1;
            self.sealer.seal(&mut entry);
            cursor.last_hash = Some(entry.log_hash.clone());
            cursor.sequence = entry.sequence_number;
        }

        debug!(
            "Ledger entry created: {} seq {}, hash: {}...",
            short(&entry.id, 8),
            entry.sequence_number,
            short(&entry.log_hash, 16)
        );

        entry
    }

    pub fn verify_integrity(&self, entry: &LedgerEntry) -> IntegrityReport {
        verify::verify_integrity(&self.sealer, entry)
    }

    pub fn verify_chain(&self, current: &LedgerEntry, previous: &LedgerEntry) -> ChainReport {
        verify::verify_chain(current, previous)
    }

    pub fn verify_chain_batch(&self, entries: &[LedgerEntry]) -> BatchReport {
        verify::verify_chain_batch(&self.sealer, entries)
    }
}
