//! Signature primitives backing the VM's crypto instructions.
//!
//! Transaction signatures are secp256k1 ECDSA over the transaction id;
//! `eth_ecrecover` additionally recovers the signer and derives the
//! Ethereum-style keccak address from it.

use crate::types::hash::Hash;
use chainvm_derive::BinaryCodec;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use sha3::{Digest, Keccak256};

/// Compact signature length in bytes (r || s).
pub const SIGNATURE_LEN: usize = 64;

/// Length of a recoverable signature (r || s || v).
pub const RECOVERABLE_SIGNATURE_LEN: usize = 65;

/// A compact secp256k1 ECDSA signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    /// All-zero signature, used as worst-case padding by the emulator.
    pub const fn zero() -> Signature {
        Signature([0u8; SIGNATURE_LEN])
    }

    /// Builds a signature from exactly [`SIGNATURE_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Signature> {
        if slice.len() != SIGNATURE_LEN {
            return None;
        }
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes.copy_from_slice(slice);
        Some(Signature(bytes))
    }
}

/// Verifies a compact ECDSA signature over a 32-byte prehash.
///
/// `pubkey` is a SEC1-encoded secp256k1 public key (compressed or not).
/// Returns false on any malformed input; callers map that to a signature
/// failure rather than an IO failure.
pub fn verify_signature(prehash: &Hash, pubkey: &[u8], signature: &Signature) -> bool {
    let Ok(key) = VerifyingKey::from_sec1_bytes(pubkey) else {
        return false;
    };
    let Ok(sig) = EcdsaSignature::from_slice(&signature.0) else {
        return false;
    };
    key.verify_prehash(prehash.as_slice(), &sig).is_ok()
}

/// Keccak-256 digest of the given bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Recovers the Ethereum address that signed `prehash`.
///
/// `signature` is the 65-byte `r || s || v` form; `v` may be 0/1 or the
/// legacy 27/28. Returns the 20-byte keccak address of the recovered key, or
/// `None` when recovery fails.
pub fn eth_ecrecover(prehash: &[u8; 32], signature: &[u8]) -> Option<[u8; 20]> {
    if signature.len() != RECOVERABLE_SIGNATURE_LEN {
        return None;
    }
    let (rs, v) = signature.split_at(SIGNATURE_LEN);
    let v = match v[0] {
        27 | 28 => v[0] - 27,
        b => b,
    };
    let recovery_id = RecoveryId::from_byte(v)?;
    let sig = EcdsaSignature::from_slice(rs).ok()?;
    let key = VerifyingKey::recover_from_prehash(prehash, &sig, recovery_id).ok()?;

    // Ethereum address: keccak256 of the uncompressed point minus the 0x04
    // prefix, keeping the last 20 bytes.
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    Some(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{signature::hazmat::PrehashSigner, SigningKey};

    fn test_key() -> SigningKey {
        // Deterministic test scalar; any nonzero value below the curve order.
        SigningKey::from_bytes(&[7u8; 32].into()).unwrap()
    }

    #[test]
    fn verify_accepts_valid_signature() {
        let key = test_key();
        let prehash = Hash::of(b"payload");
        let sig: EcdsaSignature = key.sign_prehash(prehash.as_slice()).unwrap();
        let signature = Signature::from_slice(sig.to_bytes().as_slice()).unwrap();

        let pubkey = key.verifying_key().to_encoded_point(true);
        assert!(verify_signature(&prehash, pubkey.as_bytes(), &signature));
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let key = test_key();
        let sig: EcdsaSignature = key
            .sign_prehash(Hash::of(b"payload").as_slice())
            .unwrap();
        let signature = Signature::from_slice(sig.to_bytes().as_slice()).unwrap();

        let pubkey = key.verifying_key().to_encoded_point(true);
        let other = Hash::of(b"other");
        assert!(!verify_signature(&other, pubkey.as_bytes(), &signature));
    }

    #[test]
    fn verify_rejects_garbage_inputs() {
        let prehash = Hash::of(b"payload");
        assert!(!verify_signature(&prehash, b"not a key", &Signature::zero()));
    }

    #[test]
    fn ecrecover_roundtrip() {
        let key = test_key();
        let prehash = keccak256(b"eth message");
        let (sig, recovery_id) = key.sign_prehash_recoverable(&prehash).unwrap();

        let mut recoverable = [0u8; RECOVERABLE_SIGNATURE_LEN];
        recoverable[..SIGNATURE_LEN].copy_from_slice(sig.to_bytes().as_slice());
        recoverable[SIGNATURE_LEN] = recovery_id.to_byte();

        let recovered = eth_ecrecover(&prehash, &recoverable).unwrap();

        let point = key.verifying_key().to_encoded_point(false);
        let expected = &keccak256(&point.as_bytes()[1..])[12..];
        assert_eq!(&recovered[..], expected);
    }

    #[test]
    fn ecrecover_rejects_short_signature() {
        assert!(eth_ecrecover(&[0u8; 32], &[0u8; 64]).is_none());
    }
}
