use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Highest index of the 48-bit shachain. Commitment `n` uses shachain index
/// `MAX_SHACHAIN_INDEX - n`, so later commitments carry more derivation bits
/// and the receiver can compact storage.
pub const MAX_SHACHAIN_INDEX: u64 = (1 << 48) - 1;

const STORE_BUCKETS: usize = 49;

/// Derives the element at `index`, processing the low `bits` bits from most
/// to least significant: each set bit flips the corresponding bit of the
/// running value, followed by a SHA-256.
fn derive_element(base: [u8; 32], bits: u8, index: u64) -> [u8; 32] {
    let mut value = base;
    for bit in (0..bits).rev() {
        if (index >> bit) & 1 == 1 {
            value[(bit / 8) as usize] ^= 1 << (bit % 8);
            value = sha256::Hash::hash(&value).to_byte_array();
        }
    }
    value
}

/// Deterministic producer of per-commitment secrets, seeded by a 32-byte
/// revocation root. The root is handed out by the wallet at reservation time
/// and never persisted in plaintext by the channel record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RevocationProducer {
    root: [u8; 32],
}

impl RevocationProducer {
    pub fn new(root: [u8; 32]) -> Self {
        RevocationProducer { root }
    }

    /// Secret for the commitment with the given state number.
    pub fn secret_at(&self, commitment_index: u64) -> [u8; 32] {
        derive_element(self.root, 48, MAX_SHACHAIN_INDEX - commitment_index)
    }

    /// Commitment point for the given state number: the public key of the
    /// per-commitment secret.
    pub fn commitment_point<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        commitment_index: u64,
    ) -> Result<PublicKey, Error> {
        let secret = SecretKey::from_slice(&self.secret_at(commitment_index))?;
        Ok(PublicKey::from_secret_key(secp, &secret))
    }
}

/// Compact receiver-side store of the counterparty's revealed per-commitment
/// secrets. A secret whose shachain index has `b` trailing zero bits can
/// re-derive every already-known secret in buckets below `b`; the store
/// verifies that before accepting, so an inconsistent chain is rejected.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RevocationStore {
    buckets: Vec<Option<(u64, [u8; 32])>>,
}

impl Default for RevocationStore {
    fn default() -> Self {
        RevocationStore {
            buckets: vec![None; STORE_BUCKETS],
        }
    }
}

impl RevocationStore {
    pub fn new() -> Self {
        RevocationStore::default()
    }

    /// Accepts the secret revealed for `commitment_index`, verifying it
    /// against every secret it claims to supersede.
    pub fn add_next(&mut self, commitment_index: u64, secret: [u8; 32]) -> Result<(), Error> {
        let index = MAX_SHACHAIN_INDEX - commitment_index;
        let bucket = index.trailing_zeros().min(48) as u8;
        for b in 0..bucket {
            if let Some((known_index, known_secret)) = self.buckets[b as usize] {
                if derive_element(secret, bucket, known_index) != known_secret {
                    return Err(Error::InvalidRevocationSecret);
                }
            }
        }
        self.buckets[bucket as usize] = Some((index, secret));
        Ok(())
    }

    /// Looks up (or re-derives) the secret for an old commitment, if any
    /// stored secret covers it.
    pub fn secret_for(&self, commitment_index: u64) -> Option<[u8; 32]> {
        let index = MAX_SHACHAIN_INDEX - commitment_index;
        for entry in self.buckets.iter().flatten() {
            let (known_index, known_secret) = *entry;
            let bits = known_index.trailing_zeros().min(48) as u8;
            let mask = !((1u64 << bits) - 1);
            if index & mask == known_index {
                return Some(derive_element(known_secret, bits, index));
            }
        }
        None
    }
}
