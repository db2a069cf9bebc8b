use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};

/// Deterministic non-zero secret key for tests.
pub fn secret_key(seed: u32) -> SecretKey {
    let mut bytes = [0u8; 32];
    bytes[28..].copy_from_slice(&seed.to_be_bytes());
    bytes[0] = 1;
    SecretKey::from_slice(&bytes).expect("valid test key")
}

pub fn test_point<C: Signing>(secp: &Secp256k1<C>, seed: u32) -> PublicKey {
    PublicKey::from_secret_key(secp, &secret_key(seed))
}
