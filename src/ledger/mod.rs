//! Hash-Chain Audit Ledger
//!
//! Tamper-evident records of gateway requests: a canonical content hash per
//! entry, an HMAC signature binding it to its chain position, and
//! single-entry, pairwise and batch verification.

pub mod canonical;
pub mod entry;
pub mod merkle;
pub mod seal;
pub mod service;
pub mod verify;

pub use entry::{EntryRequest, LedgerEntry, PiiEntity, PiiResult, PiiRiskLevel};
pub use merkle::{archive_batch, verify_archive, ArchiveBundle};
pub use seal::Sealer;
pub use service::{LedgerCursor, LedgerService};
pub use verify::{BatchReport, BatchVerifier, ChainReport, IntegrityReport};
