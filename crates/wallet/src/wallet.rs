use async_trait::async_trait;
use bitcoin::{BlockHash, OutPoint, ScriptBuf, Transaction, Witness};
use serde::{Deserialize, Serialize};

use crate::coin_selection::Utxo;
use crate::error::Error;
use crate::keys::ChannelKeySecrets;

/// Witness data (and, for nested inputs, the script sig) finalizing one
/// funding-transaction input.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InputScript {
    pub witness: Witness,
    pub script_sig: ScriptBuf,
}

/// The wallet surface the funding engine depends on: coin listing and
/// locking, change derivation, channel key derivation, input signing and
/// broadcast. The engine holds the coin-selection lock; implementations only
/// need per-call consistency.
#[async_trait]
pub trait WalletBackend: Send + Sync {
    /// Hash of the genesis block of the chain this wallet operates on.
    fn chain_hash(&self) -> BlockHash;

    /// Spendable outputs, in the order coin selection should consider them.
    async fn list_unspent(&self) -> Result<Vec<Utxo>, Error>;

    /// Reserves an outpoint so no other spend will consume it.
    async fn lock_outpoint(&self, outpoint: OutPoint);

    /// Releases a previously locked outpoint.
    async fn unlock_outpoint(&self, outpoint: OutPoint);

    /// A fresh change script.
    async fn next_change_script(&self) -> Result<ScriptBuf, Error>;

    /// Derives a fresh set of channel keys plus a revocation root.
    async fn derive_channel_secrets(&self) -> Result<ChannelKeySecrets, Error>;

    /// Signs the funding-transaction input at `input_index`, which spends
    /// `utxo`.
    async fn sign_funding_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        utxo: &Utxo,
    ) -> Result<InputScript, Error>;

    /// Broadcasts a finalized transaction.
    async fn broadcast(&self, tx: &Transaction) -> Result<(), Error>;
}
