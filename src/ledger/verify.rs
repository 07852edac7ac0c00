//! Ledger Verification
//!
//! Integrity, chain and batch checks. Violations come back as report data
//! so an auditor can describe corruption instead of failing on it.

use serde::Serialize;
use tracing::warn;

use crate::ledger::entry::{short, LedgerEntry};
use crate::ledger::seal::Sealer;

/// Result of re-deriving one entry's hash and signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub hash_valid: bool,
    pub signature_valid: bool,
    pub errors: Vec<String>,
}

/// Result of checking the link between two adjacent entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub is_valid: bool,
    pub chain_valid: bool,
    pub sequence_valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityFailure {
    pub entry_id: String,
    pub sequence: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainFailure {
    pub current_id: String,
    pub previous_id: String,
    pub current_sequence: u64,
    pub previous_sequence: u64,
    pub errors: Vec<String>,
}

/// Aggregate over a run of entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub all_valid: bool,
    pub entries_checked: usize,
    pub individual_failures: Vec<IntegrityFailure>,
    pub chain_failures: Vec<ChainFailure>,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        if self.all_valid {
            format!("ledger is valid ({} entries checked)", self.entries_checked)
        } else {
            format!(
                "ledger is INVALID ({} entries checked, {} integrity failures, {} chain failures)",
                self.entries_checked,
                self.individual_failures.len(),
                self.chain_failures.len()
            )
        }
    }
}

/// Recompute `log_hash` and `signature` from the entry's current fields
pub fn verify_integrity(sealer: &Sealer, entry: &LedgerEntry) -> IntegrityReport {
    let mut errors = Vec::new();

    let expected_hash = sealer.content_hash(entry);
    let hash_valid = expected_hash == entry.log_hash;
    if !hash_valid {
        errors.push(format!(
            "Content hash mismatch: expected {}..., got {}...",
            short(&expected_hash, 16),
            short(&entry.log_hash, 16)
        ));
    }

    // Signed input uses the recomputed hash, so a field edit fails both checks.
    let signature_valid =
        sealer.verify_signature(&expected_hash, entry.chain_hash.as_deref(), &entry.signature);
    if !signature_valid {
        errors.push("HMAC signature verification failed - possible tampering".to_string());
    }

    let is_valid = hash_valid && signature_valid;
    if !is_valid {
        warn!(
            "Ledger integrity check FAILED for {} (seq {}): {:?}",
            entry.id, entry.sequence_number, errors
        );
    }

    IntegrityReport {
        is_valid,
        hash_valid,
        signature_valid,
        errors,
    }
}

/// Check that `current` directly follows `previous`
pub fn verify_chain(current: &LedgerEntry, previous: &LedgerEntry) -> ChainReport {
    let mut errors = Vec::new();

    let chain_valid = current.chain_hash.as_deref() == Some(previous.log_hash.as_str());
    if !chain_valid {
        errors.push(format!(
            "Chain broken: current.chain_hash={}... != previous.log_hash={}...",
            short(current.chain_marker(), 16),
            short(&previous.log_hash, 16)
        ));
    }

    let sequence_valid = previous
        .sequence_number
        .checked_add(1)
        .is_some_and(|next| next == current.sequence_number);
    if !sequence_valid {
        errors.push(format!(
            "Sequence gap: {} -> {}",
            previous.sequence_number, current.sequence_number
        ));
    }

    let is_valid = chain_valid && sequence_valid;
    if !is_valid {
        warn!(
            "Chain integrity check FAILED between {} and {}: {:?}",
            short(&previous.id, 8),
            short(&current.id, 8),
            errors
        );
    }

    ChainReport {
        is_valid,
        chain_valid,
        sequence_valid,
        errors,
    }
}

/// Incremental batch verification.
///
/// Entries are pushed in sequence order; each one is integrity-checked and
/// chain-checked against the one pushed before it. Nothing short-circuits.
#[derive(Debug)]
pub struct BatchVerifier<'a> {
    sealer: &'a Sealer,
    previous: Option<LedgerEntry>,
    entries_checked: usize,
    individual_failures: Vec<IntegrityFailure>,
    chain_failures: Vec<ChainFailure>,
}

impl<'a> BatchVerifier<'a> {
    pub fn new(sealer: &'a Sealer) -> Self {
        Self {
            sealer,
            previous: None,
            entries_checked: 0,
            individual_failures: Vec::new(),
            chain_failures: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: &LedgerEntry) {
        let integrity = verify_integrity(self.sealer, entry);
        if !integrity.is_valid {
            self.individual_failures.push(IntegrityFailure {
                entry_id: entry.id.clone(),
                sequence: entry.sequence_number,
                errors: integrity.errors,
            });
        }

        if let Some(previous) = &self.previous {
            let chain = verify_chain(entry, previous);
            if !chain.is_valid {
                self.chain_failures.push(ChainFailure {
                    current_id: entry.id.clone(),
                    previous_id: previous.id.clone(),
                    current_sequence: entry.sequence_number,
                    previous_sequence: previous.sequence_number,
                    errors: chain.errors,
                });
            }
        }

        self.previous = Some(entry.clone());
        self.entries_checked += 1;
    }

    pub fn extend<'e>(&mut self, entries: impl IntoIterator<Item = &'e LedgerEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    pub fn finish(self) -> BatchReport {
        BatchReport {
            all_valid: self.individual_failures.is_empty() && self.chain_failures.is_empty(),
            entries_checked: self.entries_checked,
            individual_failures: self.individual_failures,
            chain_failures: self.chain_failures,
        }
    }
}

/// Verify every entry and every adjacent pair of `entries`
pub fn verify_chain_batch(sealer: &Sealer, entries: &[LedgerEntry]) -> BatchReport {
    let mut verifier = BatchVerifier::new(sealer);
    verifier.extend(entries);
    verifier.finish()
}
