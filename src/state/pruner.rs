//! Trie-store pruning.
//!
//! Retains the trie nodes reachable from a recent-block window and deletes
//! the rest. Reachability is approximated with a bloom filter sized far
//! above the expected node count, so a stale node is only ever kept by a
//! false positive, never deleted by mistake. Values that decode as contract
//! state records are always kept: contract state is immutable history that
//! later blocks may still reference.
//!
//! The caller must hold the trie-store lock for the whole pass; the pruner
//! never tolerates concurrent mutation.

use crate::state::contract::ContractStateRecord;
use crate::state::store::RawKvStore;
use crate::types::encoding::Decode;
use crate::types::hash::Hash;
use crate::utils::log::Logger;
use crate::vm::errors::IoFailure;

/// Blocks retained per chain.
pub const RETAINED_BLOCKS: usize = 128;

/// Node hashes inserted into the filter per streaming batch.
pub const NODE_BATCH_SIZE: usize = 256;

/// Expected number of reachable node hashes the filter is sized for.
pub const BLOOM_EXPECTED_ITEMS: usize = 80_000_000;

/// Target false-positive rate of the filter.
pub const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// A fixed-size bloom filter over trie-node hashes.
pub struct BloomFilter {
    bits: Vec<u64>,
    bit_count: u64,
    hash_count: u32,
}

impl BloomFilter {
    /// Sizes a filter for `expected_items` at the given false-positive rate.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> BloomFilter {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let bit_count = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let hash_count = ((bit_count as f64 / n) * ln2).round().max(1.0) as u32;
        BloomFilter {
            bits: vec![0u64; bit_count.div_ceil(64) as usize],
            bit_count,
            hash_count,
        }
    }

    /// Filter sized with the protocol defaults.
    pub fn with_defaults() -> BloomFilter {
        BloomFilter::new(BLOOM_EXPECTED_ITEMS, BLOOM_FALSE_POSITIVE_RATE)
    }

    /// Derives the double-hashing pair for an item.
    fn index_pair(item: &[u8]) -> (u64, u64) {
        let mut h = Hash::hasher();
        h.write(b"BLOOM");
        h.write(item);
        let digest = h.finish();
        let a = u64::from_le_bytes(digest.0[0..8].try_into().unwrap());
        let b = u64::from_le_bytes(digest.0[8..16].try_into().unwrap());
        (a, b | 1)
    }

    /// Inserts an item.
    pub fn insert(&mut self, item: &[u8]) {
        let (a, b) = Self::index_pair(item);
        for i in 0..self.hash_count as u64 {
            let bit = a.wrapping_add(i.wrapping_mul(b)) % self.bit_count;
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// Membership test; false positives possible, false negatives not.
    pub fn contains(&self, item: &[u8]) -> bool {
        let (a, b) = Self::index_pair(item);
        for i in 0..self.hash_count as u64 {
            let bit = a.wrapping_add(i.wrapping_mul(b)) % self.bit_count;
            if self.bits[(bit / 64) as usize] & (1 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }
}

/// Outcome of one pruning pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Entries visited in the sweep.
    pub scanned: usize,
    /// Entries deleted.
    pub deleted: usize,
    /// Entries kept because they decode as contract state.
    pub kept_contract_state: usize,
}

/// Prunes a raw trie store against a reachable-node set.
pub struct TriePruner {
    filter: BloomFilter,
    logger: Logger,
}

impl TriePruner {
    /// Creates a pruner with a default-sized filter.
    pub fn new() -> TriePruner {
        TriePruner {
            filter: BloomFilter::with_defaults(),
            logger: Logger::new("pruner"),
        }
    }

    /// Creates a pruner with a custom-sized filter (tests).
    pub fn with_filter(filter: BloomFilter) -> TriePruner {
        TriePruner {
            filter,
            logger: Logger::new("pruner"),
        }
    }

    /// Feeds reachable node hashes into the filter in bounded batches.
    ///
    /// The iterator streams every node hash reachable from the retained
    /// block window ([`RETAINED_BLOCKS`] per chain); batching keeps peak
    /// memory independent of the trie size.
    pub fn index_reachable(&mut self, reachable: impl Iterator<Item = Hash>) {
        let mut batch = Vec::with_capacity(NODE_BATCH_SIZE);
        let mut total = 0usize;
        for hash in reachable {
            batch.push(hash);
            if batch.len() == NODE_BATCH_SIZE {
                total += batch.len();
                for h in batch.drain(..) {
                    self.filter.insert(h.as_slice());
                }
            }
        }
        total += batch.len();
        for h in batch.drain(..) {
            self.filter.insert(h.as_slice());
        }
        self.logger.info(&format!("indexed {} reachable nodes", total));
    }

    /// Sweeps the store, deleting unreachable non-contract-state entries.
    pub fn sweep(&self, store: &mut dyn RawKvStore) -> Result<PruneStats, IoFailure> {
        let mut stats = PruneStats::default();
        let mut doomed: Vec<Vec<u8>> = Vec::new();

        for (key, value) in store.iter_entries() {
            stats.scanned += 1;
            if self.filter.contains(&key) {
                continue;
            }
            if ContractStateRecord::from_bytes(&value).is_ok() {
                stats.kept_contract_state += 1;
                continue;
            }
            doomed.push(key);
        }

        for chunk in doomed.chunks(NODE_BATCH_SIZE) {
            store.delete_batch(chunk)?;
            stats.deleted += chunk.len();
        }
        self.logger.info(&format!(
            "swept {} entries, deleted {}",
            stats.scanned, stats.deleted
        ));
        Ok(stats)
    }
}

impl Default for TriePruner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::TxOutputRef;
    use crate::state::store::MemoryKvStore;
    use crate::types::encoding::Encode;
    use crate::types::numeric::U256;
    use crate::vm::value::Val;

    fn node_key(seed: u8) -> Hash {
        Hash::of(&[seed])
    }

    fn small_pruner() -> TriePruner {
        TriePruner::with_filter(BloomFilter::new(1_000, 0.01))
    }

    #[test]
    fn bloom_has_no_false_negatives() {
        let mut filter = BloomFilter::new(1_000, 0.01);
        for i in 0..100u8 {
            filter.insert(node_key(i).as_slice());
        }
        for i in 0..100u8 {
            assert!(filter.contains(node_key(i).as_slice()));
        }
    }

    #[test]
    fn bloom_rejects_most_absent_items() {
        let mut filter = BloomFilter::new(10_000, 0.01);
        for i in 0..100u8 {
            filter.insert(node_key(i).as_slice());
        }
        let false_positives = (100..200u8)
            .filter(|&i| filter.contains(node_key(i).as_slice()))
            .count();
        // 1% nominal rate over 100 probes; allow generous slack.
        assert!(false_positives < 10, "{} false positives", false_positives);
    }

    #[test]
    fn sweep_deletes_only_unreachable_non_contract_entries() {
        let mut store = MemoryKvStore::new();
        let reachable = node_key(1);
        let stale = node_key(2);
        let contract_key = node_key(3);

        store.put(reachable.to_vec(), b"live node".to_vec());
        store.put(stale.to_vec(), b"stale node".to_vec());
        let record = ContractStateRecord {
            code_hash: Hash::of(b"code"),
            fields: vec![Val::U256(U256::from(1u64))],
            asset_ref: TxOutputRef::asset(&Hash::of(b"tx"), 0),
        };
        store.put(contract_key.to_vec(), record.to_bytes().to_vec());

        let mut pruner = small_pruner();
        pruner.index_reachable([reachable].into_iter());
        let stats = pruner.sweep(&mut store).unwrap();

        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.kept_contract_state, 1);
        assert!(store.get(&reachable.to_vec()).is_some());
        assert!(store.get(&stale.to_vec()).is_none());
        assert!(store.get(&contract_key.to_vec()).is_some());
    }

    #[test]
    fn index_reachable_handles_partial_batches() {
        let mut pruner = small_pruner();
        let nodes: Vec<Hash> = (0..(NODE_BATCH_SIZE + 3))
            .map(|i| Hash::of(&(i as u32).to_le_bytes()))
            .collect();
        pruner.index_reachable(nodes.iter().copied());
        for node in &nodes {
            assert!(pruner.filter.contains(node.as_slice()));
        }
    }
}
