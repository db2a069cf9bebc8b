use bitcoin::{BlockHash, OutPoint, Transaction, Txid};

/// A single tip movement reported by the chain backend. Connects must arrive
/// in strictly increasing height order; disconnects must match the current
/// tip. Anything else is dropped by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainUpdate {
    pub hash: BlockHash,
    pub height: u32,
    pub kind: ChainUpdateKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainUpdateKind {
    Connected,
    Disconnected,
}

/// Location of a transaction within a confirmed block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockDetails {
    pub hash: BlockHash,
    pub height: u32,
    pub tx_index: u32,
}

/// A transaction observed by the backend, either confirmed (with block
/// details) or mempool-only (`block == None`).
#[derive(Clone, Debug)]
pub struct TxUpdate {
    pub tx: Transaction,
    pub block: Option<BlockDetails>,
}

/// Fanned out to every block-epoch subscriber on each connected block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockEpoch {
    pub hash: BlockHash,
    pub height: u32,
}

/// Delivered exactly once to a spend subscriber when a confirmed transaction
/// consumes the watched outpoint.
#[derive(Clone, Debug)]
pub struct SpendDetail {
    pub spent_outpoint: OutPoint,
    pub spender_txid: Txid,
    pub spending_tx: Transaction,
    pub spender_input_index: u32,
    pub spending_height: u32,
}

/// Delivered exactly once to a confirmation subscriber when the watched
/// transaction reaches its requested depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxConfirmation {
    pub block_hash: BlockHash,
    pub block_height: u32,
    pub tx_index: u32,
}
