use async_trait::async_trait;
use bitcoin::{Block, BlockHash, OutPoint, Txid};

use crate::error::Error;
use crate::events::TxUpdate;

/// The RPC surface the notifier needs from a chain source. Implementations
/// wrap a full node or an indexing server; all calls may be retried by the
/// backend itself, the notifier treats failures as transient.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Current best tip.
    async fn best_block(&self) -> Result<(BlockHash, u32), Error>;

    /// Asks the backend to start delivering block connect/disconnect
    /// callbacks.
    async fn notify_blocks(&self) -> Result<(), Error>;

    /// Asks the backend to watch for transactions redeeming the given
    /// outpoints and deliver them through the redeeming-tx callback.
    async fn notify_spent(&self, outpoints: Vec<OutPoint>) -> Result<(), Error>;

    /// Hash of the main-chain block at `height`.
    async fn block_hash(&self, height: u32) -> Result<BlockHash, Error>;

    /// Full block by hash.
    async fn block(&self, hash: &BlockHash) -> Result<Block, Error>;

    /// Height and transaction ids of the block, without fetching full
    /// transaction data.
    async fn block_verbose(&self, hash: &BlockHash) -> Result<(u32, Vec<Txid>), Error>;

    /// Hash of the block containing `txid`, `None` when the backend has no
    /// record of the transaction (the well-defined "no tx info" case rather
    /// than an error).
    async fn tx_block_hash(&self, txid: &Txid) -> Result<Option<BlockHash>, Error>;

    /// The output if it is currently unspent (mempool included), `None` when
    /// it is spent or unknown.
    async fn unspent_output(
        &self,
        outpoint: &OutPoint,
    ) -> Result<Option<bitcoin::TxOut>, Error>;

    /// Rescans the chain from `start` for transactions spending any of the
    /// given outpoints. The returned updates are replayed by the caller
    /// through the regular redeeming-tx path.
    async fn rescan_spends(
        &self,
        start: BlockHash,
        outpoints: Vec<OutPoint>,
    ) -> Result<Vec<TxUpdate>, Error>;
}
