use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{All, PublicKey, Secp256k1};
use bitcoin::transaction::Version;
use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};

use cygnus_chain::{ChainBackend, ChainNotifier};
use cygnus_common::{SatPerKw, SatPerVbyte};

use crate::channel::{
    ChannelConfig, ChannelConstraints, ChannelContribution, ChannelType, CommitmentSnapshot,
    OpenChannel,
};
use crate::coin_selection::select_coins;
use crate::commitment::{build_commitment_tx, sort_canonically, state_hint_obfuscator};
use crate::error::Error;
use crate::reservation::{ChannelReservation, ReservationState};
use crate::revocation::{RevocationProducer, RevocationStore};
use crate::script::{
    funding_script_pubkey, funding_witness_script, sign_commitment, verify_commitment_sig,
    verify_p2wpkh_spend,
};
use crate::store::ChannelStore;
use crate::wallet::{InputScript, WalletBackend};

/// Capacity of the engine's message queue.
const FUNDING_QUEUE_SIZE: usize = 50;

/// Parameters of a new reservation.
#[derive(Clone, Debug)]
pub struct FundingReq {
    pub peer: PublicKey,
    pub chain_hash: BlockHash,
    pub our_funding_amount: u64,
    pub capacity: u64,
    pub push_amount: u64,
    pub commit_fee_rate: SatPerKw,
    pub funding_fee_rate: SatPerVbyte,
    pub constraints: ChannelConstraints,
}

/// The signatures one side hands over once the contribution exchange is
/// complete: the canonical funding outpoint, witnesses for its own funding
/// inputs and its signature over the counterparty's commitment.
#[derive(Clone, Debug)]
pub struct ContributionSigs {
    pub funding_outpoint: OutPoint,
    pub input_scripts: Vec<(OutPoint, InputScript)>,
    pub commitment_sig: Signature,
}

type Resp<T> = oneshot::Sender<Result<T, Error>>;

enum FundingMsg {
    Init {
        req: Box<FundingReq>,
        resp: Resp<(u64, ChannelContribution)>,
    },
    Cancel {
        id: u64,
        resp: Resp<()>,
    },
    AddContribution {
        id: u64,
        theirs: Box<ChannelContribution>,
        resp: Resp<ContributionSigs>,
    },
    AddSingleContribution {
        id: u64,
        theirs: Box<ChannelContribution>,
        resp: Resp<()>,
    },
    AddCounterSigs {
        id: u64,
        input_scripts: Vec<(OutPoint, InputScript)>,
        commitment_sig: Signature,
        resp: Resp<OpenChannel>,
    },
    AddSingleFunderSigs {
        id: u64,
        funding_outpoint: OutPoint,
        commitment_sig: Signature,
        resp: Resp<(Signature, OpenChannel)>,
    },
}

/// Wiring for a funding engine.
pub struct FundingEngineCfg {
    pub chain_hash: BlockHash,
    pub wallet: Arc<dyn WalletBackend>,
    pub store: Arc<dyn ChannelStore>,
    pub chain_source: Arc<dyn ChainBackend>,
    /// When present, every persisted channel gets a funding-confirmation
    /// watcher that flips the store's pending flag at this depth.
    pub notifier: Option<Arc<ChainNotifier>>,
    pub funding_conf_depth: u32,
}

/// The funding reservation engine: a single dispatcher task owning every
/// in-flight channel opening. All mutation funnels through its message
/// queue; callers interact through the async methods on this front.
pub struct FundingEngine {
    msg_tx: mpsc::Sender<FundingMsg>,
    shutdown: watch::Sender<bool>,
}

impl FundingEngine {
    pub fn start(cfg: FundingEngineCfg) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(FUNDING_QUEUE_SIZE);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = FundingDispatcher {
            chain_hash: cfg.chain_hash,
            wallet: cfg.wallet,
            store: cfg.store,
            chain_source: cfg.chain_source,
            notifier: cfg.notifier,
            funding_conf_depth: cfg.funding_conf_depth,
            secp: Secp256k1::new(),
            limbo: HashMap::new(),
            locked_outpoints: HashSet::new(),
            next_id: 1,
            msg_rx,
            shutdown_rx,
        };
        tokio::spawn(dispatcher.run());
        FundingEngine { msg_tx, shutdown }
    }

    /// Signals shutdown; in-flight reservations release their coins.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Starts a reservation, performing policy checks, coin selection and
    /// key derivation. Returns the reservation id and our contribution.
    pub async fn init_reservation(
        &self,
        req: FundingReq,
    ) -> Result<(u64, ChannelContribution), Error> {
        self.request(|resp| FundingMsg::Init {
            req: Box::new(req),
            resp,
        })
        .await
    }

    /// Aborts a reservation, releasing every locked outpoint.
    pub async fn cancel_reservation(&self, id: u64) -> Result<(), Error> {
        self.request(|resp| FundingMsg::Cancel { id, resp }).await
    }

    /// Records the counterparty's contribution, builds the funding and
    /// commitment transactions and signs both our inputs and their
    /// commitment.
    pub async fn add_contribution(
        &self,
        id: u64,
        theirs: ChannelContribution,
    ) -> Result<ContributionSigs, Error> {
        self.request(|resp| FundingMsg::AddContribution {
            id,
            theirs: Box::new(theirs),
            resp,
        })
        .await
    }

    /// Responder half of a single-funder flow: records the initiator's
    /// contribution; nothing is built until the funding outpoint arrives.
    pub async fn add_single_contribution(
        &self,
        id: u64,
        theirs: ChannelContribution,
    ) -> Result<(), Error> {
        self.request(|resp| FundingMsg::AddSingleContribution {
            id,
            theirs: Box::new(theirs),
            resp,
        })
        .await
    }

    /// Final initiator step: verifies the counterparty's funding witnesses
    /// and commitment signature, persists the channel and broadcasts the
    /// funding transaction.
    pub async fn add_counter_sigs(
        &self,
        id: u64,
        input_scripts: Vec<(OutPoint, InputScript)>,
        commitment_sig: Signature,
    ) -> Result<OpenChannel, Error> {
        self.request(|resp| FundingMsg::AddCounterSigs {
            id,
            input_scripts,
            commitment_sig,
            resp,
        })
        .await
    }

    /// Final responder step of a single-funder flow: builds both commitments
    /// around the initiator's funding outpoint, verifies their signature,
    /// signs theirs and persists the channel.
    pub async fn add_single_funder_sigs(
        &self,
        id: u64,
        funding_outpoint: OutPoint,
        commitment_sig: Signature,
    ) -> Result<(Signature, OpenChannel), Error> {
        self.request(|resp| FundingMsg::AddSingleFunderSigs {
            id,
            funding_outpoint,
            commitment_sig,
            resp,
        })
        .await
    }

    async fn request<T>(&self, make: impl FnOnce(Resp<T>) -> FundingMsg) -> Result<T, Error> {
        if *self.shutdown.borrow() {
            return Err(Error::ShuttingDown);
        }
        let (resp, rx) = oneshot::channel();
        self.msg_tx
            .send(make(resp))
            .await
            .map_err(|_| Error::ShuttingDown)?;
        rx.await.map_err(|_| Error::ShuttingDown)?
    }
}

struct FundingDispatcher {
    chain_hash: BlockHash,
    wallet: Arc<dyn WalletBackend>,
    store: Arc<dyn ChannelStore>,
    chain_source: Arc<dyn ChainBackend>,
    notifier: Option<Arc<ChainNotifier>>,
    funding_conf_depth: u32,
    secp: Secp256k1<All>,
    limbo: HashMap<u64, ChannelReservation>,
    /// Wallet-wide set of coins owned by live reservations. Selection and
    /// locking happen inside the dispatcher, so the set doubles as the
    /// coin-selection lock.
    locked_outpoints: HashSet<OutPoint>,
    next_id: u64,
    msg_rx: mpsc::Receiver<FundingMsg>,
    shutdown_rx: watch::Receiver<bool>,
}

impl FundingDispatcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                Some(msg) = self.msg_rx.recv() => self.handle(msg).await,
                else => break,
            }
        }
        info!("funding engine exiting, releasing limbo reservations");
        let reservations: Vec<ChannelReservation> = self.limbo.drain().map(|(_, r)| r).collect();
        for reservation in reservations {
            self.release_inputs(&reservation).await;
        }
    }

    async fn handle(&mut self, msg: FundingMsg) {
        match msg {
            FundingMsg::Init { req, resp } => {
                let _ = resp.send(self.init_reservation(*req).await);
            }
            FundingMsg::Cancel { id, resp } => {
                let _ = resp.send(self.cancel_reservation(id).await);
            }
            FundingMsg::AddContribution { id, theirs, resp } => {
                let _ = resp.send(self.add_contribution(id, *theirs).await);
            }
            FundingMsg::AddSingleContribution { id, theirs, resp } => {
                let _ = resp.send(self.add_single_contribution(id, *theirs));
            }
            FundingMsg::AddCounterSigs {
                id,
                input_scripts,
                commitment_sig,
                resp,
            } => {
                let _ = resp.send(self.add_counter_sigs(id, input_scripts, commitment_sig).await);
            }
            FundingMsg::AddSingleFunderSigs {
                id,
                funding_outpoint,
                commitment_sig,
                resp,
            } => {
                let _ = resp.send(
                    self.add_single_funder_sigs(id, funding_outpoint, commitment_sig)
                        .await,
                );
            }
        }
    }

    async fn init_reservation(
        &mut self,
        req: FundingReq,
    ) -> Result<(u64, ChannelContribution), Error> {
        if req.our_funding_amount + req.capacity == 0 {
            return Err(Error::ConstraintViolation {
                field: "channel_capacity",
                value: 0,
                bound: 1,
            });
        }
        if req.our_funding_amount > req.capacity {
            return Err(Error::ConstraintViolation {
                field: "funding_amount",
                value: req.our_funding_amount,
                bound: req.capacity,
            });
        }
        if req.chain_hash != self.chain_hash {
            return Err(Error::ChainMismatch {
                expected: self.chain_hash,
                got: req.chain_hash,
            });
        }
        req.constraints.validate()?;

        let commit_fee = req.commit_fee_rate.commit_fee();
        let (our_balance, their_balance) = if req.our_funding_amount == 0 {
            // Responder to a single funder: the initiator carries the fee.
            (
                req.push_amount as i64,
                req.capacity as i64 - commit_fee as i64 - req.push_amount as i64,
            )
        } else if req.our_funding_amount == req.capacity {
            (
                req.capacity as i64 - commit_fee as i64 - req.push_amount as i64,
                req.push_amount as i64,
            )
        } else {
            // Dual funder: each side carries half the commitment fee.
            let half_fee = (commit_fee / 2) as i64;
            (
                req.our_funding_amount as i64 - half_fee - req.push_amount as i64,
                (req.capacity - req.our_funding_amount) as i64 - half_fee
                    + req.push_amount as i64,
            )
        };
        if their_balance < 0 {
            return Err(Error::FunderBalanceDust {
                fee: commit_fee,
                balance: their_balance,
                min_required: 0,
            });
        }
        if req.our_funding_amount > 0
            && our_balance <= 2 * req.constraints.dust_limit as i64
        {
            return Err(Error::FunderBalanceDust {
                fee: commit_fee,
                balance: our_balance,
                min_required: 2 * req.constraints.dust_limit,
            });
        }
        let chan_type = if our_balance == 0 || their_balance == 0 || req.push_amount > 0 {
            ChannelType::SingleFunder
        } else {
            ChannelType::DualFunder
        };
        let is_initiator = chan_type == ChannelType::SingleFunder && req.our_funding_amount > 0;

        let secrets = self.wallet.derive_channel_secrets().await?;
        let revocation_producer = RevocationProducer::new(secrets.revocation_root);
        let first_commitment_point = revocation_producer.commitment_point(&self.secp, 0)?;

        let mut inputs = Vec::new();
        let mut change_outputs = Vec::new();
        if req.our_funding_amount > 0 {
            // The dispatcher serializes every selection, so listing through
            // locking is one atomic step with respect to other reservations.
            let unspent = self.wallet.list_unspent().await?;
            let available: Vec<_> = unspent
                .into_iter()
                .filter(|u| !self.locked_outpoints.contains(&u.outpoint))
                .collect();
            let selection =
                select_coins(req.funding_fee_rate, req.our_funding_amount, &available)?;
            if selection.change > 0 {
                let script = self.wallet.next_change_script().await?;
                change_outputs.push(TxOut {
                    value: Amount::from_sat(selection.change),
                    script_pubkey: script,
                });
            }
            for utxo in &selection.inputs {
                self.locked_outpoints.insert(utxo.outpoint);
                self.wallet.lock_outpoint(utxo.outpoint).await;
            }
            inputs = selection.inputs;
        }

        let our_contribution = ChannelContribution {
            funding_amount: req.our_funding_amount,
            inputs,
            change_outputs,
            first_commitment_point,
            config: ChannelConfig {
                constraints: req.constraints,
                keys: secrets.public_keys(&self.secp),
            },
        };

        let id = self.next_id;
        self.next_id += 1;
        debug!(
            "reservation {}: capacity {} sat, funding {} sat, push {} sat",
            id, req.capacity, req.our_funding_amount, req.push_amount
        );
        self.limbo.insert(
            id,
            ChannelReservation {
                id,
                state: ReservationState::WaitingContribution,
                chan_type,
                chain_hash: req.chain_hash,
                peer: req.peer,
                capacity: req.capacity,
                push_amount: req.push_amount,
                commit_fee,
                our_balance: our_balance as u64,
                their_balance: their_balance as u64,
                is_initiator,
                our_contribution: our_contribution.clone(),
                their_contribution: None,
                secrets,
                revocation_producer,
                funding_tx: None,
                funding_outpoint: None,
                our_input_scripts: Vec::new(),
                our_commitment_tx: None,
                their_commitment_tx: None,
                our_sig_for_them: None,
            },
        );
        Ok((id, our_contribution))
    }

    async fn cancel_reservation(&mut self, id: u64) -> Result<(), Error> {
        let reservation = self
            .limbo
            .remove(&id)
            .ok_or(Error::ReservationNotFound(id))?;
        self.release_inputs(&reservation).await;
        debug!("reservation {} cancelled", id);
        Ok(())
    }

    async fn release_inputs(&mut self, reservation: &ChannelReservation) {
        for utxo in &reservation.our_contribution.inputs {
            self.locked_outpoints.remove(&utxo.outpoint);
            self.wallet.unlock_outpoint(utxo.outpoint).await;
        }
    }

    async fn add_contribution(
        &mut self,
        id: u64,
        theirs: ChannelContribution,
    ) -> Result<ContributionSigs, Error> {
        let (ours, capacity, chan_type, is_initiator, our_balance, their_balance, multisig_key) = {
            let reservation = self
                .limbo
                .get(&id)
                .ok_or(Error::ReservationNotFound(id))?;
            if reservation.state != ReservationState::WaitingContribution {
                return Err(Error::Protocol(format!(
                    "reservation {} already received a contribution",
                    id
                )));
            }
            (
                reservation.our_contribution.clone(),
                reservation.capacity,
                reservation.chan_type,
                reservation.is_initiator,
                reservation.our_balance,
                reservation.their_balance,
                reservation.secrets.multisig_key,
            )
        };
        theirs.config.constraints.validate()?;

        // Assemble the funding transaction from both sides' inputs and
        // change, plus the 2-of-2 output, in canonical order.
        let funding_ws = funding_witness_script(
            &ours.config.keys.multisig_key,
            &theirs.config.keys.multisig_key,
        );
        let funding_spk = funding_script_pubkey(&funding_ws);
        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: Vec::new(),
            output: Vec::new(),
        };
        for utxo in ours.inputs.iter().chain(theirs.inputs.iter()) {
            tx.input.push(TxIn {
                previous_output: utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
        }
        tx.output.extend(ours.change_outputs.iter().cloned());
        tx.output.extend(theirs.change_outputs.iter().cloned());
        tx.output.push(TxOut {
            value: Amount::from_sat(capacity),
            script_pubkey: funding_spk.clone(),
        });
        sort_canonically(&mut tx);

        let funding_index = tx
            .output
            .iter()
            .position(|o| o.script_pubkey == funding_spk)
            .ok_or_else(|| Error::Commitment("funding output vanished".to_string()))?;
        let funding_outpoint = OutPoint::new(tx.compute_txid(), funding_index as u32);

        let mut our_input_scripts = Vec::new();
        for (index, input) in tx.input.iter().enumerate() {
            let Some(utxo) = ours
                .inputs
                .iter()
                .find(|u| u.outpoint == input.previous_output)
            else {
                continue;
            };
            let script = self.wallet.sign_funding_input(&tx, index, utxo).await?;
            our_input_scripts.push((utxo.outpoint, script));
        }

        let (initiator_base, responder_base) = if is_initiator {
            (
                ours.config.keys.payment_base,
                theirs.config.keys.payment_base,
            )
        } else {
            (
                theirs.config.keys.payment_base,
                ours.config.keys.payment_base,
            )
        };
        let obfuscator = state_hint_obfuscator(chan_type, &initiator_base, &responder_base);
        let our_commitment = build_commitment_tx(
            &self.secp,
            funding_outpoint,
            &ours.config,
            &theirs.config,
            our_balance,
            their_balance,
            &ours.first_commitment_point,
            0,
            obfuscator,
        )?;
        let their_commitment = build_commitment_tx(
            &self.secp,
            funding_outpoint,
            &theirs.config,
            &ours.config,
            their_balance,
            our_balance,
            &theirs.first_commitment_point,
            0,
            obfuscator,
        )?;
        let commitment_sig =
            sign_commitment(&self.secp, &their_commitment, &funding_ws, capacity, &multisig_key)?;

        let reservation = self
            .limbo
            .get_mut(&id)
            .ok_or(Error::ReservationNotFound(id))?;
        reservation.their_contribution = Some(theirs);
        reservation.funding_tx = Some(tx);
        reservation.funding_outpoint = Some(funding_outpoint);
        reservation.our_input_scripts = our_input_scripts.clone();
        reservation.our_commitment_tx = Some(our_commitment);
        reservation.their_commitment_tx = Some(their_commitment);
        reservation.our_sig_for_them = Some(commitment_sig);
        reservation.state = ReservationState::WaitingSigs;

        Ok(ContributionSigs {
            funding_outpoint,
            input_scripts: our_input_scripts,
            commitment_sig,
        })
    }

    fn add_single_contribution(
        &mut self,
        id: u64,
        theirs: ChannelContribution,
    ) -> Result<(), Error> {
        let reservation = self
            .limbo
            .get_mut(&id)
            .ok_or(Error::ReservationNotFound(id))?;
        if reservation.state != ReservationState::WaitingContribution {
            return Err(Error::Protocol(format!(
                "reservation {} already received a contribution",
                id
            )));
        }
        if reservation.is_initiator {
            return Err(Error::Protocol(
                "single-funder contribution on an initiator reservation".to_string(),
            ));
        }
        theirs.config.constraints.validate()?;
        // The funding outpoint is still unknown on this side; transactions
        // are built once the initiator reveals it.
        reservation.their_contribution = Some(theirs);
        reservation.state = ReservationState::WaitingSigs;
        Ok(())
    }

    async fn add_counter_sigs(
        &mut self,
        id: u64,
        input_scripts: Vec<(OutPoint, InputScript)>,
        commitment_sig: Signature,
    ) -> Result<OpenChannel, Error> {
        let reservation = self
            .limbo
            .get(&id)
            .ok_or(Error::ReservationNotFound(id))?;
        if reservation.state != ReservationState::WaitingSigs {
            return Err(Error::Protocol(format!(
                "reservation {} is not expecting counterparty signatures",
                id
            )));
        }
        let theirs = reservation
            .their_contribution
            .clone()
            .ok_or_else(|| Error::Protocol("missing counterparty contribution".to_string()))?;
        let mut tx = reservation
            .funding_tx
            .clone()
            .ok_or_else(|| Error::Protocol("no funding transaction built".to_string()))?;
        let ours = reservation.our_contribution.clone();
        let our_commitment = reservation
            .our_commitment_tx
            .clone()
            .ok_or_else(|| Error::Protocol("no commitment built".to_string()))?;
        let their_commitment = reservation
            .their_commitment_tx
            .clone()
            .ok_or_else(|| Error::Protocol("no commitment built".to_string()))?;
        let funding_outpoint = reservation
            .funding_outpoint
            .ok_or_else(|| Error::Protocol("no funding outpoint".to_string()))?;

        // Attach our own witnesses, then the counterparty's.
        for (outpoint, script) in reservation
            .our_input_scripts
            .iter()
            .chain(input_scripts.iter())
        {
            let index = tx
                .input
                .iter()
                .position(|i| i.previous_output == *outpoint)
                .ok_or_else(|| {
                    Error::InputScriptInvalid(format!("no funding input spends {}", outpoint))
                })?;
            tx.input[index].witness = script.witness.clone();
            tx.input[index].script_sig = script.script_sig.clone();
        }

        // Verify every remote input against the output it claims to spend,
        // as fetched from the chain source.
        for utxo in &theirs.inputs {
            let index = tx
                .input
                .iter()
                .position(|i| i.previous_output == utxo.outpoint)
                .ok_or_else(|| {
                    Error::InputScriptInvalid(format!("no funding input spends {}", utxo.outpoint))
                })?;
            let prev_output = self
                .chain_source
                .unspent_output(&utxo.outpoint)
                .await?
                .ok_or_else(|| {
                    Error::InputScriptInvalid(format!(
                        "previous output {} is unknown or spent",
                        utxo.outpoint
                    ))
                })?;
            verify_p2wpkh_spend(&self.secp, &tx, index, &prev_output)?;
        }

        let funding_ws = funding_witness_script(
            &ours.config.keys.multisig_key,
            &theirs.config.keys.multisig_key,
        );
        verify_commitment_sig(
            &self.secp,
            &our_commitment,
            &funding_ws,
            reservation.capacity,
            &commitment_sig,
            &theirs.config.keys.multisig_key,
        )?;

        let channel = OpenChannel {
            chan_type: reservation.chan_type,
            chain_hash: reservation.chain_hash,
            funding_outpoint,
            capacity: reservation.capacity,
            local_config: ours.config,
            remote_config: theirs.config,
            local_commitment: CommitmentSnapshot {
                tx: our_commitment,
                local_balance: reservation.our_balance,
                remote_balance: reservation.their_balance,
                remote_sig: Some(commitment_sig),
            },
            remote_commitment: CommitmentSnapshot {
                tx: their_commitment,
                local_balance: reservation.their_balance,
                remote_balance: reservation.our_balance,
                remote_sig: reservation.our_sig_for_them,
            },
            revocation_producer: reservation.revocation_producer,
            revocation_store: RevocationStore::new(),
            is_pending: true,
            is_initiator: reservation.is_initiator,
            remote_node: reservation.peer,
        };
        self.store.persist_channel(&channel).await?;
        self.wallet.broadcast(&tx).await?;
        info!(
            "channel {} funded, broadcast {}",
            funding_outpoint,
            tx.compute_txid()
        );

        // The locked coins are consumed by the broadcast; drop them from the
        // reservation set without returning them to the wallet.
        for utxo in &ours.inputs {
            self.locked_outpoints.remove(&utxo.outpoint);
        }
        self.limbo.remove(&id);
        self.watch_funding_confirmation(&channel);
        Ok(channel)
    }

    async fn add_single_funder_sigs(
        &mut self,
        id: u64,
        funding_outpoint: OutPoint,
        commitment_sig: Signature,
    ) -> Result<(Signature, OpenChannel), Error> {
        let reservation = self
            .limbo
            .get(&id)
            .ok_or(Error::ReservationNotFound(id))?;
        if reservation.state != ReservationState::WaitingSigs || reservation.is_initiator {
            return Err(Error::Protocol(format!(
                "reservation {} is not a responder awaiting funder signatures",
                id
            )));
        }
        let theirs = reservation
            .their_contribution
            .clone()
            .ok_or_else(|| Error::Protocol("missing initiator contribution".to_string()))?;
        let ours = reservation.our_contribution.clone();

        let funding_ws = funding_witness_script(
            &ours.config.keys.multisig_key,
            &theirs.config.keys.multisig_key,
        );
        let obfuscator = state_hint_obfuscator(
            reservation.chan_type,
            &theirs.config.keys.payment_base,
            &ours.config.keys.payment_base,
        );
        let our_commitment = build_commitment_tx(
            &self.secp,
            funding_outpoint,
            &ours.config,
            &theirs.config,
            reservation.our_balance,
            reservation.their_balance,
            &ours.first_commitment_point,
            0,
            obfuscator,
        )?;
        let their_commitment = build_commitment_tx(
            &self.secp,
            funding_outpoint,
            &theirs.config,
            &ours.config,
            reservation.their_balance,
            reservation.our_balance,
            &theirs.first_commitment_point,
            0,
            obfuscator,
        )?;

        verify_commitment_sig(
            &self.secp,
            &our_commitment,
            &funding_ws,
            reservation.capacity,
            &commitment_sig,
            &theirs.config.keys.multisig_key,
        )?;
        let our_sig = sign_commitment(
            &self.secp,
            &their_commitment,
            &funding_ws,
            reservation.capacity,
            &reservation.secrets.multisig_key,
        )?;

        let channel = OpenChannel {
            chan_type: reservation.chan_type,
            chain_hash: reservation.chain_hash,
            funding_outpoint,
            capacity: reservation.capacity,
            local_config: ours.config,
            remote_config: theirs.config,
            local_commitment: CommitmentSnapshot {
                tx: our_commitment,
                local_balance: reservation.our_balance,
                remote_balance: reservation.their_balance,
                remote_sig: Some(commitment_sig),
            },
            remote_commitment: CommitmentSnapshot {
                tx: their_commitment,
                local_balance: reservation.their_balance,
                remote_balance: reservation.our_balance,
                remote_sig: Some(our_sig),
            },
            revocation_producer: reservation.revocation_producer,
            revocation_store: RevocationStore::new(),
            is_pending: true,
            is_initiator: false,
            remote_node: reservation.peer,
        };
        self.store.persist_channel(&channel).await?;
        info!("responder channel {} persisted", funding_outpoint);

        self.limbo.remove(&id);
        self.watch_funding_confirmation(&channel);
        Ok((our_sig, channel))
    }

    /// Registers the funding transaction with the chain notifier and flips
    /// the store's pending flag once it reaches the configured depth.
    fn watch_funding_confirmation(&self, channel: &OpenChannel) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let outpoint = channel.funding_outpoint;
        let depth = self.funding_conf_depth.max(1);
        tokio::spawn(async move {
            let height_hint = match notifier.best_block().await {
                Ok((_, height)) => height,
                Err(e) => {
                    warn!("funding watcher could not query tip: {}", e);
                    0
                }
            };
            let event = match notifier
                .register_confirmation(outpoint.txid, depth, height_hint)
                .await
            {
                Ok(event) => event,
                Err(e) => {
                    warn!("funding confirmation registration failed: {}", e);
                    return;
                }
            };
            if let Some(conf) = event.wait().await {
                match store.mark_channel_open(&outpoint).await {
                    Ok(()) => info!(
                        "funding {} reached depth {} at height {}",
                        outpoint, depth, conf.block_height
                    ),
                    Err(e) => warn!("unable to mark channel {} open: {}", outpoint, e),
                }
            }
        });
    }
}
