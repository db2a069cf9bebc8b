use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey, Signing, Verification};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The five long-lived public keys each side contributes to a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelPublicKeys {
    /// Key in the 2-of-2 funding output.
    pub multisig_key: PublicKey,
    /// Base for the revocation keys handed to the counterparty.
    pub revocation_base: PublicKey,
    /// Base for HTLC keys.
    pub htlc_base: PublicKey,
    /// Base for the non-delayed balance output keys.
    pub payment_base: PublicKey,
    /// Base for the CSV-delayed balance output keys.
    pub delay_base: PublicKey,
}

/// The wallet-derived secret counterparts, plus the revocation root seeding
/// the per-commitment secret chain. Never persisted by this crate; the wallet
/// owns re-derivation.
#[derive(Clone)]
pub struct ChannelKeySecrets {
    pub multisig_key: SecretKey,
    pub revocation_base: SecretKey,
    pub htlc_base: SecretKey,
    pub payment_base: SecretKey,
    pub delay_base: SecretKey,
    pub revocation_root: [u8; 32],
}

impl ChannelKeySecrets {
    pub fn public_keys<C: Signing>(&self, secp: &Secp256k1<C>) -> ChannelPublicKeys {
        ChannelPublicKeys {
            multisig_key: PublicKey::from_secret_key(secp, &self.multisig_key),
            revocation_base: PublicKey::from_secret_key(secp, &self.revocation_base),
            htlc_base: PublicKey::from_secret_key(secp, &self.htlc_base),
            payment_base: PublicKey::from_secret_key(secp, &self.payment_base),
            delay_base: PublicKey::from_secret_key(secp, &self.delay_base),
        }
    }
}

fn commitment_tweak(base: &PublicKey, per_commitment_point: &PublicKey) -> Result<Scalar, Error> {
    let mut engine = sha256::Hash::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&base.serialize());
    let tweak = sha256::Hash::from_engine(engine);
    Scalar::from_be_bytes(tweak.to_byte_array())
        .map_err(|_| Error::Commitment("commitment tweak out of range".to_string()))
}

/// Tweaks a base key with the per-commitment point:
/// `base + SHA256(point || base) * G`.
pub fn derive_commitment_key<C: Verification>(
    secp: &Secp256k1<C>,
    base: &PublicKey,
    per_commitment_point: &PublicKey,
) -> Result<PublicKey, Error> {
    let base_pub = *base;
    let tweak = commitment_tweak(base, per_commitment_point)?;
    Ok(base_pub.add_exp_tweak(secp, &tweak)?)
}

/// Secret-side counterpart of [`derive_commitment_key`].
pub fn derive_commitment_secret<C: Signing>(
    secp: &Secp256k1<C>,
    base: &SecretKey,
    per_commitment_point: &PublicKey,
) -> Result<SecretKey, Error> {
    let base_pub = PublicKey::from_secret_key(secp, base);
    let tweak = commitment_tweak(&base_pub, per_commitment_point)?;
    Ok(base.add_tweak(&tweak)?)
}

#[cfg(test)]
mod tests {
    use bitcoin::secp256k1::Secp256k1;

    use super::*;
    use crate::tests::keys::{secret_key, test_point};

    #[test]
    fn secret_and_public_derivation_agree() {
        let secp = Secp256k1::new();
        let base = secret_key(11);
        let base_pub = PublicKey::from_secret_key(&secp, &base);
        let point = test_point(&secp, 42);

        let derived_pub = derive_commitment_key(&secp, &base_pub, &point).unwrap();
        let derived_secret = derive_commitment_secret(&secp, &base, &point).unwrap();
        assert_eq!(PublicKey::from_secret_key(&secp, &derived_secret), derived_pub);
    }

    #[test]
    fn distinct_points_yield_distinct_keys() {
        let secp = Secp256k1::new();
        let base = test_point(&secp, 1);
        let a = derive_commitment_key(&secp, &base, &test_point(&secp, 2)).unwrap();
        let b = derive_commitment_key(&secp, &base, &test_point(&secp, 3)).unwrap();
        assert_ne!(a, b);
    }
}
