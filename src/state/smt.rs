//! Sparse-merkle-trie plumbing shared by the three world-state tries.

use crate::types::hash::Hash;
use sparse_merkle_tree::blake2b::Blake2bHasher;
use sparse_merkle_tree::default_store::DefaultStore;
use sparse_merkle_tree::traits::Value;
use sparse_merkle_tree::{SparseMerkleTree, H256};

/// Raw value stored in a trie leaf.
///
/// An empty byte vector is the trie's zero value, i.e. an absent key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrieValue(pub Vec<u8>);

impl Value for TrieValue {
    fn to_h256(&self) -> H256 {
        if self.0.is_empty() {
            return H256::zero();
        }
        hash_to_h256(&Hash::of(&self.0))
    }

    fn zero() -> Self {
        TrieValue(Vec::new())
    }
}

/// The trie type used for outputs, contract state and code.
pub type Trie = SparseMerkleTree<Blake2bHasher, TrieValue, DefaultStore<TrieValue>>;

/// Converts a domain hash into a trie key.
pub fn hash_to_h256(hash: &Hash) -> H256 {
    H256::from(hash.0)
}

/// Converts a trie root back into a domain hash.
pub fn h256_to_hash(h256: &H256) -> Hash {
    Hash::from_slice(h256.as_slice()).unwrap_or_else(Hash::zero)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_value_is_trie_zero() {
        assert_eq!(TrieValue::zero().to_h256(), H256::zero());
        assert_ne!(TrieValue(vec![1]).to_h256(), H256::zero());
    }

    #[test]
    fn update_changes_root_and_reads_back() {
        let mut trie = Trie::default();
        let empty_root = *trie.root();

        let key = hash_to_h256(&Hash::of(b"key"));
        trie.update(key, TrieValue(vec![1, 2, 3])).unwrap();
        assert_ne!(*trie.root(), empty_root);
        assert_eq!(trie.get(&key).unwrap(), TrieValue(vec![1, 2, 3]));
    }

    #[test]
    fn deleting_restores_empty_root() {
        let mut trie = Trie::default();
        let empty_root = *trie.root();

        let key = hash_to_h256(&Hash::of(b"key"));
        trie.update(key, TrieValue(vec![9])).unwrap();
        trie.update(key, TrieValue::zero()).unwrap();
        assert_eq!(*trie.root(), empty_root);
    }

    #[test]
    fn hash_h256_conversion_roundtrip() {
        let hash = Hash::of(b"node");
        assert_eq!(h256_to_hash(&hash_to_h256(&hash)), hash);
    }
}
