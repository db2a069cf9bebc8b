use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Txid, Witness,
};

use crate::backend::ChainBackend;
use crate::error::Error;
use crate::events::TxUpdate;

/// Deterministic throwaway transaction; `seed` varies the locktime so each
/// call yields a distinct txid.
pub fn dummy_tx(seed: u32) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(seed),
        input: vec![],
        output: vec![TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

/// A transaction spending the given outpoint.
pub fn spending_tx(outpoint: OutPoint, seed: u32) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(seed),
        input: vec![TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(40_000),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

pub fn dummy_block_hash(seed: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    BlockHash::from_byte_array(bytes)
}

fn block_with(nonce: u32, txns: Vec<Transaction>) -> Block {
    Block {
        header: Header {
            version: BlockVersion::TWO,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_600_000_000,
            bits: CompactTarget::from_consensus(0x1d00_ffff),
            nonce,
        },
        txdata: txns,
    }
}

#[derive(Default)]
struct MockChainState {
    best: Option<(BlockHash, u32)>,
    blocks: HashMap<BlockHash, (u32, Block)>,
    hash_by_height: HashMap<u32, BlockHash>,
    tx_location: HashMap<Txid, BlockHash>,
    utxos: HashMap<OutPoint, TxOut>,
    rescan_results: HashMap<OutPoint, TxUpdate>,
}

/// Scripted chain backend: tests stage blocks, UTXOs and rescan replies, then
/// drive the notifier through its public callbacks.
#[derive(Default)]
pub struct MockChainBackend {
    state: Mutex<MockChainState>,
}

impl MockChainBackend {
    pub fn new(best_height: u32) -> Self {
        let backend = MockChainBackend::default();
        backend.add_block(best_height, vec![]);
        backend
    }

    /// Stages a block at `height` and returns its hash. The block is indexed
    /// for hash/height/tx lookups and becomes the best tip if higher.
    pub fn add_block(&self, height: u32, txns: Vec<Transaction>) -> BlockHash {
        let mut state = self.state.lock().unwrap();
        let nonce = (state.blocks.len() as u32) << 16 | (height & 0xFFFF);
        let block = block_with(nonce, txns);
        let hash = block.block_hash();
        for tx in &block.txdata {
            state.tx_location.insert(tx.compute_txid(), hash);
        }
        state.hash_by_height.insert(height, hash);
        state.blocks.insert(hash, (height, block));
        if state.best.map_or(true, |(_, h)| height >= h) {
            state.best = Some((hash, height));
        }
        hash
    }

    pub fn add_utxo(&self, outpoint: OutPoint, value: u64) {
        let mut state = self.state.lock().unwrap();
        state.utxos.insert(
            outpoint,
            TxOut {
                value: Amount::from_sat(value),
                script_pubkey: ScriptBuf::new(),
            },
        );
    }

    pub fn remove_utxo(&self, outpoint: &OutPoint) {
        self.state.lock().unwrap().utxos.remove(outpoint);
    }

    /// Stages the reply a rescan for `outpoint` will produce.
    pub fn stage_rescan_spend(&self, outpoint: OutPoint, update: TxUpdate) {
        self.state
            .lock()
            .unwrap()
            .rescan_results
            .insert(outpoint, update);
    }
}

#[async_trait]
impl ChainBackend for MockChainBackend {
    async fn best_block(&self) -> Result<(BlockHash, u32), Error> {
        self.state
            .lock()
            .unwrap()
            .best
            .ok_or_else(|| Error::Backend("no chain staged".into()))
    }

    async fn notify_blocks(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn notify_spent(&self, _outpoints: Vec<OutPoint>) -> Result<(), Error> {
        Ok(())
    }

    async fn block_hash(&self, height: u32) -> Result<BlockHash, Error> {
        self.state
            .lock()
            .unwrap()
            .hash_by_height
            .get(&height)
            .copied()
            .ok_or(Error::HeaderHeightNotFound(height))
    }

    async fn block(&self, hash: &BlockHash) -> Result<Block, Error> {
        self.state
            .lock()
            .unwrap()
            .blocks
            .get(hash)
            .map(|(_, block)| block.clone())
            .ok_or(Error::HeaderHashNotFound(*hash))
    }

    async fn block_verbose(&self, hash: &BlockHash) -> Result<(u32, Vec<Txid>), Error> {
        self.state
            .lock()
            .unwrap()
            .blocks
            .get(hash)
            .map(|(height, block)| {
                (
                    *height,
                    block.txdata.iter().map(|tx| tx.compute_txid()).collect(),
                )
            })
            .ok_or(Error::HeaderHashNotFound(*hash))
    }

    async fn tx_block_hash(&self, txid: &Txid) -> Result<Option<BlockHash>, Error> {
        Ok(self.state.lock().unwrap().tx_location.get(txid).copied())
    }

    async fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<TxOut>, Error> {
        Ok(self.state.lock().unwrap().utxos.get(outpoint).cloned())
    }

    async fn rescan_spends(
        &self,
        _start: BlockHash,
        outpoints: Vec<OutPoint>,
    ) -> Result<Vec<TxUpdate>, Error> {
        let state = self.state.lock().unwrap();
        Ok(outpoints
            .iter()
            .filter_map(|op| state.rescan_results.get(op).cloned())
            .collect())
    }
}
