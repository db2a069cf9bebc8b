//! Two funding engines wired back to back through in-memory backends,
//! driving the single- and dual-funder opening flows end to end.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use bitcoin::{Amount, Block, BlockHash, OutPoint, ScriptBuf, Transaction, Txid, TxOut};

use cygnus_chain::{ChainBackend, Error as ChainError, TxUpdate};
use cygnus_common::{SatPerKw, SatPerVbyte, units::BITCOIN};
use cygnus_wallet::script::{p2wpkh_script, sign_p2wpkh_input};
use cygnus_wallet::{
    ChannelConstraints, ChannelKeySecrets, ChannelStore, ChannelType, Error, FundingEngine,
    FundingEngineCfg, FundingReq, InputScript, MemoryChannelStore, Utxo, UtxoKind, WalletBackend,
};

fn secret_key(seed: u32) -> SecretKey {
    let mut bytes = [0u8; 32];
    bytes[28..].copy_from_slice(&seed.to_be_bytes());
    bytes[0] = 1;
    SecretKey::from_slice(&bytes).expect("valid test key")
}

fn node_key(secp: &Secp256k1<All>, seed: u32) -> PublicKey {
    PublicKey::from_secret_key(secp, &secret_key(seed))
}

struct WalletState {
    utxos: Vec<Utxo>,
    input_keys: HashMap<OutPoint, SecretKey>,
    locked: HashSet<OutPoint>,
    broadcast: Vec<Transaction>,
    key_counter: u32,
}

/// Deterministic wallet: a fixed set of P2WPKH coins, keys derived from a
/// seed, and a record of every broadcast.
struct TestWallet {
    secp: Secp256k1<All>,
    chain_hash: BlockHash,
    state: Mutex<WalletState>,
}

impl TestWallet {
    fn new(chain_hash: BlockHash, seed_base: u32, values: &[u64]) -> Self {
        let secp = Secp256k1::new();
        let mut utxos = Vec::new();
        let mut input_keys = HashMap::new();
        for (i, value) in values.iter().enumerate() {
            let key = secret_key(seed_base + i as u32);
            let script_pubkey = p2wpkh_script(&PublicKey::from_secret_key(&secp, &key));
            let mut txid_bytes = [0u8; 32];
            txid_bytes[..4].copy_from_slice(&seed_base.to_be_bytes());
            txid_bytes[4..8].copy_from_slice(&(i as u32).to_be_bytes());
            let outpoint = OutPoint::new(Txid::from_byte_array(txid_bytes), i as u32);
            utxos.push(Utxo {
                outpoint,
                value: *value,
                kind: UtxoKind::WitnessPubkey,
                script_pubkey,
            });
            input_keys.insert(outpoint, key);
        }
        TestWallet {
            secp,
            chain_hash,
            state: Mutex::new(WalletState {
                utxos,
                input_keys,
                locked: HashSet::new(),
                broadcast: Vec::new(),
                key_counter: seed_base + 10_000,
            }),
        }
    }

    fn prevouts(&self) -> HashMap<OutPoint, TxOut> {
        let state = self.state.lock().unwrap();
        state
            .utxos
            .iter()
            .map(|u| {
                (
                    u.outpoint,
                    TxOut {
                        value: Amount::from_sat(u.value),
                        script_pubkey: u.script_pubkey.clone(),
                    },
                )
            })
            .collect()
    }

    fn locked_count(&self) -> usize {
        self.state.lock().unwrap().locked.len()
    }

    fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().broadcast.clone()
    }

    fn next_key(&self) -> SecretKey {
        let mut state = self.state.lock().unwrap();
        state.key_counter += 1;
        secret_key(state.key_counter)
    }
}

#[async_trait]
impl WalletBackend for TestWallet {
    fn chain_hash(&self) -> BlockHash {
        self.chain_hash
    }

    async fn list_unspent(&self) -> Result<Vec<Utxo>, Error> {
        Ok(self.state.lock().unwrap().utxos.clone())
    }

    async fn lock_outpoint(&self, outpoint: OutPoint) {
        self.state.lock().unwrap().locked.insert(outpoint);
    }

    async fn unlock_outpoint(&self, outpoint: OutPoint) {
        self.state.lock().unwrap().locked.remove(&outpoint);
    }

    async fn next_change_script(&self) -> Result<ScriptBuf, Error> {
        let key = self.next_key();
        Ok(p2wpkh_script(&PublicKey::from_secret_key(&self.secp, &key)))
    }

    async fn derive_channel_secrets(&self) -> Result<ChannelKeySecrets, Error> {
        let base = {
            let mut state = self.state.lock().unwrap();
            state.key_counter += 10;
            state.key_counter
        };
        let mut revocation_root = [0u8; 32];
        revocation_root[..4].copy_from_slice(&base.to_be_bytes());
        revocation_root[31] = 1;
        Ok(ChannelKeySecrets {
            multisig_key: secret_key(base),
            revocation_base: secret_key(base + 1),
            htlc_base: secret_key(base + 2),
            payment_base: secret_key(base + 3),
            delay_base: secret_key(base + 4),
            revocation_root,
        })
    }

    async fn sign_funding_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        utxo: &Utxo,
    ) -> Result<InputScript, Error> {
        let key = {
            let state = self.state.lock().unwrap();
            state
                .input_keys
                .get(&utxo.outpoint)
                .copied()
                .ok_or_else(|| Error::Wallet(format!("unknown input {}", utxo.outpoint)))?
        };
        let prev_output = TxOut {
            value: Amount::from_sat(utxo.value),
            script_pubkey: utxo.script_pubkey.clone(),
        };
        let witness = sign_p2wpkh_input(&self.secp, tx, input_index, &prev_output, &key)?;
        Ok(InputScript {
            witness,
            script_sig: ScriptBuf::new(),
        })
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<(), Error> {
        self.state.lock().unwrap().broadcast.push(tx.clone());
        Ok(())
    }
}

/// Chain source answering UTXO queries from a fixed table; the funding flow
/// only needs `unspent_output`.
struct StaticChainSource {
    utxos: HashMap<OutPoint, TxOut>,
}

#[async_trait]
impl ChainBackend for StaticChainSource {
    async fn best_block(&self) -> Result<(BlockHash, u32), ChainError> {
        Ok((BlockHash::all_zeros(), 100))
    }

    async fn notify_blocks(&self) -> Result<(), ChainError> {
        Ok(())
    }

    async fn notify_spent(&self, _outpoints: Vec<OutPoint>) -> Result<(), ChainError> {
        Ok(())
    }

    async fn block_hash(&self, height: u32) -> Result<BlockHash, ChainError> {
        Err(ChainError::HeaderHeightNotFound(height))
    }

    async fn block(&self, hash: &BlockHash) -> Result<Block, ChainError> {
        Err(ChainError::HeaderHashNotFound(*hash))
    }

    async fn block_verbose(&self, hash: &BlockHash) -> Result<(u32, Vec<Txid>), ChainError> {
        Err(ChainError::HeaderHashNotFound(*hash))
    }

    async fn tx_block_hash(&self, _txid: &Txid) -> Result<Option<BlockHash>, ChainError> {
        Ok(None)
    }

    async fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<TxOut>, ChainError> {
        Ok(self.utxos.get(outpoint).cloned())
    }

    async fn rescan_spends(
        &self,
        _start: BlockHash,
        _outpoints: Vec<OutPoint>,
    ) -> Result<Vec<TxUpdate>, ChainError> {
        Ok(Vec::new())
    }
}

struct Node {
    engine: FundingEngine,
    wallet: Arc<TestWallet>,
    store: Arc<MemoryChannelStore>,
}

fn spin_up(
    chain_hash: BlockHash,
    seed_base: u32,
    values: &[u64],
    chain_source: Arc<StaticChainSource>,
) -> Node {
    let wallet = Arc::new(TestWallet::new(chain_hash, seed_base, values));
    let store = Arc::new(MemoryChannelStore::new());
    let engine = FundingEngine::start(FundingEngineCfg {
        chain_hash,
        wallet: wallet.clone(),
        store: store.clone(),
        chain_source,
        notifier: None,
        funding_conf_depth: 3,
    });
    Node {
        engine,
        wallet,
        store,
    }
}

fn req(
    peer: PublicKey,
    chain_hash: BlockHash,
    our_funding_amount: u64,
    capacity: u64,
    push_amount: u64,
) -> FundingReq {
    FundingReq {
        peer,
        chain_hash,
        our_funding_amount,
        capacity,
        push_amount,
        commit_fee_rate: SatPerKw(250),
        funding_fee_rate: SatPerVbyte(25),
        constraints: ChannelConstraints::default(),
    }
}

#[tokio::test]
async fn single_funder_happy_path() {
    let secp = Secp256k1::new();
    let chain_hash = BlockHash::all_zeros();
    let alice_node = node_key(&secp, 901);
    let bob_node = node_key(&secp, 902);

    let alice_wallet = TestWallet::new(chain_hash, 1_000, &vec![4 * BITCOIN; 20]);
    let chain_source = Arc::new(StaticChainSource {
        utxos: alice_wallet.prevouts(),
    });
    let alice = {
        let wallet = Arc::new(alice_wallet);
        let store = Arc::new(MemoryChannelStore::new());
        Node {
            engine: FundingEngine::start(FundingEngineCfg {
                chain_hash,
                wallet: wallet.clone(),
                store: store.clone(),
                chain_source: chain_source.clone(),
                notifier: None,
                funding_conf_depth: 3,
            }),
            wallet,
            store,
        }
    };
    let bob = spin_up(chain_hash, 2_000, &[], chain_source);

    let capacity = 4 * BITCOIN;
    let push = BITCOIN;
    let (id_a, contrib_a) = alice
        .engine
        .init_reservation(req(bob_node, chain_hash, capacity, capacity, push))
        .await
        .expect("alice init");
    assert!(!contrib_a.inputs.is_empty());
    assert_eq!(contrib_a.change_outputs.len(), 1);

    let (id_b, contrib_b) = bob
        .engine
        .init_reservation(req(alice_node, chain_hash, 0, capacity, push))
        .await
        .expect("bob init");
    assert!(contrib_b.inputs.is_empty());
    assert!(contrib_b.change_outputs.is_empty());

    let sigs_a = alice
        .engine
        .add_contribution(id_a, contrib_b.clone())
        .await
        .expect("alice processes bob's contribution");
    bob.engine
        .add_single_contribution(id_b, contrib_a.clone())
        .await
        .expect("bob records alice's contribution");

    let (bob_sig, chan_b) = bob
        .engine
        .add_single_funder_sigs(id_b, sigs_a.funding_outpoint, sigs_a.commitment_sig)
        .await
        .expect("bob completes");
    let chan_a = alice
        .engine
        .add_counter_sigs(id_a, Vec::new(), bob_sig)
        .await
        .expect("alice completes");

    assert_eq!(chan_a.chan_type, ChannelType::SingleFunder);
    assert!(chan_a.is_initiator);
    assert!(!chan_b.is_initiator);
    assert_eq!(chan_a.funding_outpoint, chan_b.funding_outpoint);
    assert!(chan_a.is_pending && chan_b.is_pending);

    // The broadcast funding transaction carries the multisig output at the
    // canonical index.
    let broadcasts = alice.wallet.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    let funding_tx = &broadcasts[0];
    assert_eq!(funding_tx.compute_txid(), chan_a.funding_outpoint.txid);
    let funding_out = &funding_tx.output[chan_a.funding_outpoint.vout as usize];
    assert_eq!(funding_out.value, Amount::from_sat(capacity));
    assert!(funding_out.script_pubkey.is_p2wsh());
    assert!(funding_tx.input.iter().all(|i| !i.witness.is_empty()));

    // Both sides hold mirrored, byte-identical commitment transactions.
    assert_eq!(chan_a.local_commitment.tx, chan_b.remote_commitment.tx);
    assert_eq!(chan_a.remote_commitment.tx, chan_b.local_commitment.tx);
    let commit_fee = SatPerKw(250).commit_fee();
    assert_eq!(chan_a.local_commitment.local_balance, capacity - commit_fee - push);
    assert_eq!(chan_b.local_commitment.local_balance, push);

    // Persisted and re-loaded state matches what the flow returned.
    let stored = alice
        .store
        .channel(&bob_node, &chan_a.funding_outpoint)
        .await
        .unwrap()
        .expect("alice persisted the channel");
    let round_tripped: cygnus_wallet::OpenChannel =
        serde_json::from_str(&serde_json::to_string(&stored).unwrap()).unwrap();
    assert_eq!(round_tripped.funding_outpoint, chan_a.funding_outpoint);
    assert_eq!(round_tripped.local_commitment.tx, chan_a.local_commitment.tx);
    assert_eq!(round_tripped.remote_commitment.tx, chan_a.remote_commitment.tx);
    assert_eq!(round_tripped.local_config, chan_a.local_config);
    assert_eq!(round_tripped.remote_config, chan_a.remote_config);
}

#[tokio::test]
async fn dual_funder_happy_path() {
    let secp = Secp256k1::new();
    let chain_hash = BlockHash::all_zeros();
    let alice_node = node_key(&secp, 903);
    let bob_node = node_key(&secp, 904);

    let alice_wallet = TestWallet::new(chain_hash, 3_000, &vec![4 * BITCOIN; 10]);
    let bob_wallet = TestWallet::new(chain_hash, 4_000, &vec![4 * BITCOIN; 10]);
    let mut prevouts = alice_wallet.prevouts();
    prevouts.extend(bob_wallet.prevouts());
    let chain_source = Arc::new(StaticChainSource { utxos: prevouts });

    let mk_node = |wallet: TestWallet| {
        let wallet = Arc::new(wallet);
        let store = Arc::new(MemoryChannelStore::new());
        Node {
            engine: FundingEngine::start(FundingEngineCfg {
                chain_hash,
                wallet: wallet.clone(),
                store: store.clone(),
                chain_source: chain_source.clone(),
                notifier: None,
                funding_conf_depth: 3,
            }),
            wallet,
            store,
        }
    };
    let alice = mk_node(alice_wallet);
    let bob = mk_node(bob_wallet);

    let capacity = 10 * BITCOIN;
    let half = 5 * BITCOIN;
    let (id_a, contrib_a) = alice
        .engine
        .init_reservation(req(bob_node, chain_hash, half, capacity, 0))
        .await
        .expect("alice init");
    let (id_b, contrib_b) = bob
        .engine
        .init_reservation(req(alice_node, chain_hash, half, capacity, 0))
        .await
        .expect("bob init");
    assert!(!contrib_a.inputs.is_empty());
    assert!(!contrib_b.inputs.is_empty());

    let sigs_a = alice
        .engine
        .add_contribution(id_a, contrib_b.clone())
        .await
        .expect("alice exchange");
    let sigs_b = bob
        .engine
        .add_contribution(id_b, contrib_a.clone())
        .await
        .expect("bob exchange");
    assert_eq!(sigs_a.funding_outpoint, sigs_b.funding_outpoint);

    let chan_a = alice
        .engine
        .add_counter_sigs(id_a, sigs_b.input_scripts.clone(), sigs_b.commitment_sig)
        .await
        .expect("alice finalizes");
    let chan_b = bob
        .engine
        .add_counter_sigs(id_b, sigs_a.input_scripts.clone(), sigs_a.commitment_sig)
        .await
        .expect("bob finalizes");

    assert_eq!(chan_a.chan_type, ChannelType::DualFunder);
    assert_eq!(chan_b.chan_type, ChannelType::DualFunder);
    assert!(!chan_a.is_initiator && !chan_b.is_initiator);
    assert_eq!(chan_a.funding_outpoint, chan_b.funding_outpoint);
    assert_eq!(chan_a.local_commitment.tx, chan_b.remote_commitment.tx);
    assert_eq!(chan_a.remote_commitment.tx, chan_b.local_commitment.tx);
    assert_eq!(
        alice.wallet.broadcasts()[0].compute_txid(),
        bob.wallet.broadcasts()[0].compute_txid()
    );
}

#[tokio::test]
async fn insufficient_funds_locks_nothing() {
    let secp = Secp256k1::new();
    let chain_hash = BlockHash::all_zeros();
    let peer = node_key(&secp, 905);

    let wallet = TestWallet::new(chain_hash, 5_000, &vec![4 * BITCOIN; 16]);
    let chain_source = Arc::new(StaticChainSource {
        utxos: wallet.prevouts(),
    });
    let node = {
        let wallet = Arc::new(wallet);
        let store = Arc::new(MemoryChannelStore::new());
        Node {
            engine: FundingEngine::start(FundingEngineCfg {
                chain_hash,
                wallet: wallet.clone(),
                store: store.clone(),
                chain_source,
                notifier: None,
                funding_conf_depth: 3,
            }),
            wallet,
            store,
        }
    };

    let err = node
        .engine
        .init_reservation(req(peer, chain_hash, 900 * BITCOIN, 900 * BITCOIN, 0))
        .await
        .unwrap_err();
    match err {
        Error::InsufficientFunds {
            available,
            required,
        } => {
            assert_eq!(available, 64 * BITCOIN);
            assert!(required >= 900 * BITCOIN);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(node.wallet.locked_count(), 0);
}

#[tokio::test]
async fn init_policy_rejections() {
    let secp = Secp256k1::new();
    let chain_hash = BlockHash::all_zeros();
    let peer = node_key(&secp, 906);

    let wallet = TestWallet::new(chain_hash, 6_000, &[4 * BITCOIN]);
    let chain_source = Arc::new(StaticChainSource {
        utxos: wallet.prevouts(),
    });
    let engine = FundingEngine::start(FundingEngineCfg {
        chain_hash,
        wallet: Arc::new(wallet),
        store: Arc::new(MemoryChannelStore::new()),
        chain_source,
        notifier: None,
        funding_conf_depth: 3,
    });

    // Zero amount and zero capacity.
    let err = engine
        .init_reservation(req(peer, chain_hash, 0, 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConstraintViolation { .. }));

    // Wrong chain.
    let mut other_chain = [0u8; 32];
    other_chain[0] = 9;
    let err = engine
        .init_reservation(req(
            peer,
            BlockHash::from_byte_array(other_chain),
            BITCOIN,
            BITCOIN,
            0,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChainMismatch { .. }));

    // Responder whose computed remote balance is negative.
    let err = engine
        .init_reservation(req(peer, chain_hash, 0, 50_000, 50_000))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FunderBalanceDust { .. }));

    // Initiator whose post-fee balance is below twice the dust limit.
    let mut dusty = req(peer, chain_hash, 2_000, 2_000, 0);
    dusty.commit_fee_rate = SatPerKw(3_000);
    let err = engine.init_reservation(dusty).await.unwrap_err();
    assert!(matches!(err, Error::FunderBalanceDust { .. }));
}

#[tokio::test]
async fn cancel_releases_locked_outpoints() {
    let secp = Secp256k1::new();
    let chain_hash = BlockHash::all_zeros();
    let peer = node_key(&secp, 907);

    let wallet = Arc::new(TestWallet::new(chain_hash, 7_000, &vec![4 * BITCOIN; 4]));
    let chain_source = Arc::new(StaticChainSource {
        utxos: wallet.prevouts(),
    });
    let engine = FundingEngine::start(FundingEngineCfg {
        chain_hash,
        wallet: wallet.clone(),
        store: Arc::new(MemoryChannelStore::new()),
        chain_source,
        notifier: None,
        funding_conf_depth: 3,
    });

    let (id, _) = engine
        .init_reservation(req(peer, chain_hash, 4 * BITCOIN, 4 * BITCOIN, 0))
        .await
        .expect("init");
    assert!(wallet.locked_count() > 0);

    engine.cancel_reservation(id).await.expect("cancel");
    assert_eq!(wallet.locked_count(), 0);

    // A second cancel targets a cleared id.
    let err = engine.cancel_reservation(id).await.unwrap_err();
    assert!(matches!(err, Error::ReservationNotFound(_)));
}
