use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{BlockHash, OutPoint, Transaction};

use crate::channel::{ChannelContribution, ChannelType};
use crate::keys::ChannelKeySecrets;
use crate::revocation::RevocationProducer;
use crate::wallet::InputScript;

/// Progress of an in-flight reservation. Persisted reservations leave the
/// limbo map entirely, so no terminal variant exists here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReservationState {
    /// Waiting for the counterparty's contribution.
    WaitingContribution,
    /// Contribution exchanged; waiting for the counterparty's signatures.
    WaitingSigs,
}

/// A single in-flight channel opening, owned by the funding engine's limbo
/// map and mutated only by its dispatcher.
pub struct ChannelReservation {
    pub id: u64,
    pub state: ReservationState,
    pub chan_type: ChannelType,
    pub chain_hash: BlockHash,
    pub peer: PublicKey,
    pub capacity: u64,
    pub push_amount: u64,
    pub commit_fee: u64,
    pub our_balance: u64,
    pub their_balance: u64,
    pub is_initiator: bool,
    pub our_contribution: ChannelContribution,
    pub their_contribution: Option<ChannelContribution>,
    pub(crate) secrets: ChannelKeySecrets,
    pub revocation_producer: RevocationProducer,
    pub funding_tx: Option<Transaction>,
    pub funding_outpoint: Option<OutPoint>,
    /// Our witnesses for the funding inputs we contributed, keyed by the
    /// outpoint each one spends.
    pub our_input_scripts: Vec<(OutPoint, InputScript)>,
    pub our_commitment_tx: Option<Transaction>,
    pub their_commitment_tx: Option<Transaction>,
    /// Our signature over the counterparty's commitment, produced when the
    /// contribution exchange completes.
    pub our_sig_for_them: Option<Signature>,
}
