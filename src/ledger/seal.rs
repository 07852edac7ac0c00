//! Entry Sealing
//!
//! Content hash and HMAC signature computation. The signature binds the
//! content hash to the chain position so an entry can't be re-linked
//! without the shared secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

use crate::ledger::canonical;
use crate::ledger::entry::LedgerEntry;

type HmacSha256 = Hmac<Sha256>;

/// Holder of the process-wide HMAC secret
#[derive(Clone)]
pub struct Sealer {
    secret: Vec<u8>,
}

impl fmt::Debug for Sealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sealer")
            .field("secret", &"[redacted]")
            .finish()
    }
}

impl Sealer {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// SHA-256 hex digest over the entry's canonical bytes
    pub fn content_hash(&self, entry: &LedgerEntry) -> String {
        canonical::content_hash(entry)
    }

    /// HMAC-SHA256 hex digest over `"{log_hash}:{chain_hash|genesis}"`
    pub fn sign(&self, log_hash: &str, chain_hash: Option<&str>) -> String {
        let mut mac = self.mac();
        mac.update(signature_input(log_hash, chain_hash).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a stored hex signature
    pub fn verify_signature(&self, log_hash: &str, chain_hash: Option<&str>, signature: &str) -> bool {
        let Ok(claimed) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(signature_input(log_hash, chain_hash).as_bytes());
        mac.verify_slice(&claimed).is_ok()
    }

    /// Fill in `log_hash` and `signature` from the entry's current fields.
    pub fn seal(&self, entry: &mut LedgerEntry) {
        entry.log_hash = self.content_hash(entry);
        entry.signature = self.sign(&entry.log_hash, entry.chain_hash.as_deref());
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC takes keys of any length, so this can't fail.
        HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"))
    }
}

fn signature_input(log_hash: &str, chain_hash: Option<&str>) -> String {
    format!(
        "{}:{}",
        log_hash,
        chain_hash.unwrap_or(crate::ledger::entry::GENESIS_MARKER)
    )
}
