//! Merkle Tree for Ledger Archives
//!
//! Folds a contiguous run of entries into a single root so the run can be
//! archived as one sealed bundle. Each archived copy carries an
//! `archive_hash` binding its `log_hash` to the bundle root.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::LedgerEntry;

/// Merkle tree node
#[derive(Debug, Clone)]
pub struct MerkleNode {
    pub hash: String,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    fn leaf(entry: &LedgerEntry) -> Self {
        Self {
            hash: entry.log_hash.clone(),
            left: None,
            right: None,
        }
    }

    fn internal(left: MerkleNode, right: MerkleNode) -> Self {
        Self {
            hash: combine(&left.hash, &right.hash),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    /// Odd node out is paired with itself
    fn single_child(child: MerkleNode) -> Self {
        Self {
            hash: combine(&child.hash, &child.hash),
            left: Some(Box::new(child.clone())),
            right: Some(Box::new(child)),
        }
    }
}

fn combine(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build Merkle tree over the entries' `log_hash` leaves
pub fn build_merkle_tree(entries: &[LedgerEntry]) -> LedgerResult<MerkleNode> {
    let mut nodes: VecDeque<MerkleNode> = entries.iter().map(MerkleNode::leaf).collect();
    if nodes.is_empty() {
        return Err(LedgerError::Serialization(
            "Cannot build Merkle tree from empty entries".to_string(),
        ));
    }

    while nodes.len() > 1 {
        let mut next_level = VecDeque::with_capacity(nodes.len().div_ceil(2));
        while let Some(left) = nodes.pop_front() {
            match nodes.pop_front() {
                Some(right) => next_level.push_back(MerkleNode::internal(left, right)),
                None => next_level.push_back(MerkleNode::single_child(left)),
            }
        }
        nodes = next_level;
    }

    let root = nodes
        .pop_front()
        .ok_or_else(|| LedgerError::Serialization("Merkle tree has no root".to_string()))?;
    debug!("Merkle tree root: {}", root.hash);
    Ok(root)
}

/// Get Merkle root hash
pub fn merkle_root(entries: &[LedgerEntry]) -> LedgerResult<String> {
    Ok(build_merkle_tree(entries)?.hash)
}

/// Inclusion proof for one entry: sibling hashes from leaf to root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: String,
    pub steps: Vec<ProofStep>,
    pub root_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: String,
    /// Sibling sits on the left of the running hash
    pub sibling_is_left: bool,
}

impl MerkleProof {
    /// Recompute the root from the leaf and compare
    pub fn verify(&self) -> bool {
        let computed = self.steps.iter().fold(self.leaf_hash.clone(), |acc, step| {
            if step.sibling_is_left {
                combine(&step.sibling, &acc)
            } else {
                combine(&acc, &step.sibling)
            }
        });
        computed == self.root_hash
    }
}

/// Generate Merkle proof for the entry at `entry_index`
pub fn generate_merkle_proof(entries: &[LedgerEntry], entry_index: usize) -> LedgerResult<MerkleProof> {
    if entry_index >= entries.len() {
        return Err(LedgerError::Serialization(format!(
            "Entry index {} out of range ({} entries)",
            entry_index,
            entries.len()
        )));
    }

    let mut level: Vec<String> = entries.iter().map(|e| e.log_hash.clone()).collect();
    let mut index = entry_index;
    let mut steps = Vec::new();

    while level.len() > 1 {
        let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
        // Odd tail pairs with itself
        let sibling = level.get(sibling_index).unwrap_or(&level[index]).clone();
        steps.push(ProofStep {
            sibling,
            sibling_is_left: index % 2 == 1,
        });

        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => combine(left, right),
                [single] => combine(single, single),
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
        index /= 2;
    }

    Ok(MerkleProof {
        leaf_hash: entries[entry_index].log_hash.clone(),
        steps,
        root_hash: level.remove(0),
    })
}

/// Archived copies of a contiguous run of entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveBundle {
    pub merkle_root: String,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub entries: Vec<LedgerEntry>,
}

impl ArchiveBundle {
    pub fn summary(&self) -> String {
        format!(
            "Archive #{}..#{}: {} entries, root: {}",
            self.first_sequence,
            self.last_sequence,
            self.entries.len(),
            self.merkle_root
        )
    }
}

/// `archive_hash` of one archived copy
pub fn archive_hash(log_hash: &str, merkle_root: &str) -> String {
    hex::encode(Sha256::digest(format!("{}:{}", log_hash, merkle_root).as_bytes()))
}

/// Seal `entries` into an archive bundle.
///
/// Copies get `archived = true` and their `archive_hash`; `log_hash` and
/// `signature` are untouched, so each copy still verifies on its own.
pub fn archive_batch(entries: &[LedgerEntry]) -> LedgerResult<ArchiveBundle> {
    let root = merkle_root(entries)?;
    let archived: Vec<LedgerEntry> = entries
        .iter()
        .map(|entry| {
            let mut copy = entry.clone();
            copy.archived = true;
            copy.archive_hash = Some(archive_hash(&entry.log_hash, &root));
            copy
        })
        .collect();

    let bundle = ArchiveBundle {
        merkle_root: root,
        first_sequence: entries[0].sequence_number,
        last_sequence: entries[entries.len() - 1].sequence_number,
        entries: archived,
    };
    info!("{}", bundle.summary());
    Ok(bundle)
}

/// Recompute the bundle root and every `archive_hash`.
///
/// Returns the sequence numbers of copies whose archive seal doesn't
/// match; a root mismatch flags every copy.
pub fn verify_archive(bundle: &ArchiveBundle) -> LedgerResult<Vec<u64>> {
    let root = merkle_root(&bundle.entries)?;
    if root != bundle.merkle_root {
        warn!(
            "Archive root mismatch: expected {}, got {}",
            bundle.merkle_root, root
        );
        return Ok(bundle.entries.iter().map(|e| e.sequence_number).collect());
    }

    Ok(bundle
        .entries
        .iter()
        .filter(|e| {
            !e.archived || e.archive_hash.as_deref() != Some(archive_hash(&e.log_hash, &root).as_str())
        })
        .map(|e| e.sequence_number)
        .collect())
}
