use bitcoin::hashes::Hash;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{BlockHash, OutPoint, Transaction, TxOut};
use serde::{Deserialize, Serialize};

use crate::coin_selection::Utxo;
use crate::error::Error;
use crate::keys::ChannelPublicKeys;
use crate::revocation::{RevocationProducer, RevocationStore};

/// Smallest dust limit the protocol accepts for a commitment output.
pub const MIN_DUST_LIMIT: u64 = 354;

/// Upper bound on the number of HTLCs one side may offer.
pub const MAX_ACCEPTED_HTLCS_LIMIT: u16 = 483;

/// Largest CSV delay we accept from a counterparty.
pub const MAX_CSV_DELAY: u16 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ChannelType {
    /// One side supplied the whole funding amount.
    SingleFunder,
    /// Both sides contributed inputs to the funding transaction.
    DualFunder,
}

/// Limits a side imposes on the channel while it is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelConstraints {
    pub dust_limit: u64,
    pub max_pending_value: u64,
    pub reserve: u64,
    pub min_htlc: u64,
    pub max_accepted_htlcs: u16,
    pub csv_delay: u16,
}

impl Default for ChannelConstraints {
    fn default() -> Self {
        ChannelConstraints {
            dust_limit: MIN_DUST_LIMIT,
            max_pending_value: 990_000_000,
            reserve: 10_000,
            min_htlc: 1_000,
            max_accepted_htlcs: MAX_ACCEPTED_HTLCS_LIMIT,
            csv_delay: 144,
        }
    }
}

impl ChannelConstraints {
    /// Rejects parameter combinations outside the protocol's accepted
    /// ranges.
    pub fn validate(&self) -> Result<(), Error> {
        if self.dust_limit < MIN_DUST_LIMIT {
            return Err(Error::ConstraintViolation {
                field: "dust_limit",
                value: self.dust_limit,
                bound: MIN_DUST_LIMIT,
            });
        }
        if self.reserve < self.dust_limit {
            return Err(Error::ConstraintViolation {
                field: "reserve",
                value: self.reserve,
                bound: self.dust_limit,
            });
        }
        if self.max_accepted_htlcs > MAX_ACCEPTED_HTLCS_LIMIT {
            return Err(Error::ConstraintViolation {
                field: "max_accepted_htlcs",
                value: self.max_accepted_htlcs as u64,
                bound: MAX_ACCEPTED_HTLCS_LIMIT as u64,
            });
        }
        if self.csv_delay > MAX_CSV_DELAY {
            return Err(Error::ConstraintViolation {
                field: "csv_delay",
                value: self.csv_delay as u64,
                bound: MAX_CSV_DELAY as u64,
            });
        }
        Ok(())
    }
}

/// One side's channel parameters: its constraints and its five long-lived
/// keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub constraints: ChannelConstraints,
    pub keys: ChannelPublicKeys,
}

/// Everything one side brings to a funding flow. A pure responder carries no
/// inputs and no change.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChannelContribution {
    pub funding_amount: u64,
    pub inputs: Vec<Utxo>,
    pub change_outputs: Vec<TxOut>,
    pub first_commitment_point: PublicKey,
    pub config: ChannelConfig,
}

/// A commitment transaction snapshot: the transaction itself, the balances
/// it encodes, and the counterparty's signature over it once received.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CommitmentSnapshot {
    pub tx: Transaction,
    pub local_balance: u64,
    pub remote_balance: u64,
    pub remote_sig: Option<Signature>,
}

/// The persisted channel record produced by a completed reservation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OpenChannel {
    pub chan_type: ChannelType,
    pub chain_hash: BlockHash,
    pub funding_outpoint: OutPoint,
    pub capacity: u64,
    pub local_config: ChannelConfig,
    pub remote_config: ChannelConfig,
    pub local_commitment: CommitmentSnapshot,
    pub remote_commitment: CommitmentSnapshot,
    pub revocation_producer: RevocationProducer,
    pub revocation_store: RevocationStore,
    pub is_pending: bool,
    pub is_initiator: bool,
    pub remote_node: PublicKey,
}

impl OpenChannel {
    /// Compact 32-byte identifier: the funding txid with the output index
    /// folded into its low bytes.
    pub fn channel_id(&self) -> [u8; 32] {
        let mut id = self.funding_outpoint.txid.to_byte_array();
        let index = self.funding_outpoint.vout as u16;
        id[30] ^= (index >> 8) as u8;
        id[31] ^= (index & 0xFF) as u8;
        id
    }
}
