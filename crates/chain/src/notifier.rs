use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};

use crate::backend::ChainBackend;
use crate::conf_tracker::{ConfNtfn, ConfirmationTracker};
use crate::error::Error;
use crate::events::{
    BlockDetails, BlockEpoch, ChainUpdate, ChainUpdateKind, SpendDetail, TxConfirmation, TxUpdate,
};

/// Capacity of the bounded registration queue. Registration APIs may block on
/// it, honoring shutdown; backend-driven queues are unbounded so the backend
/// callback never waits on dispatcher progress.
const REGISTRY_QUEUE_SIZE: usize = 100;

/// Capacity of the client-visible block epoch channel. Each subscriber also
/// owns a private unbounded queue, so a slow consumer only ever delays its
/// own forwarder.
const EPOCH_CLIENT_QUEUE_SIZE: usize = 20;

/// A registration plus its admission acknowledgement. Registration APIs
/// block until the dispatcher has admitted the request, so a returned handle
/// is always live for every later event.
struct Registration {
    msg: RegistryMsg,
    done: oneshot::Sender<()>,
}

enum RegistryMsg {
    Spend {
        id: u64,
        outpoint: OutPoint,
        height_hint: u32,
        sink: oneshot::Sender<SpendDetail>,
    },
    Conf {
        id: u64,
        txid: Txid,
        num_confs: u32,
        height_hint: u32,
        sink: oneshot::Sender<TxConfirmation>,
    },
    Epoch {
        id: u64,
        queue: mpsc::UnboundedSender<BlockEpoch>,
    },
    BestBlock {
        resp: oneshot::Sender<(BlockHash, u32)>,
    },
}

enum CancelMsg {
    Spend { id: u64, outpoint: OutPoint },
    Conf { id: u64 },
    Epoch { id: u64 },
}

/// Handle for a spend registration: await the spend detail, or cancel. After
/// cancellation (or notifier shutdown) `wait` resolves to `None`.
pub struct SpendEvent {
    id: u64,
    outpoint: OutPoint,
    spend: oneshot::Receiver<SpendDetail>,
    cancels: mpsc::UnboundedSender<CancelMsg>,
}

impl SpendEvent {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> Option<SpendDetail> {
        self.spend.await.ok()
    }

    /// Idempotent; a second cancel (or a cancel after the spend fired) is a
    /// no-op.
    pub fn cancel(&self) {
        let _ = self.cancels.send(CancelMsg::Spend {
            id: self.id,
            outpoint: self.outpoint,
        });
    }
}

/// Handle for a confirmation registration.
#[derive(Debug)]
pub struct ConfirmationEvent {
    id: u64,
    conf: oneshot::Receiver<TxConfirmation>,
    cancels: mpsc::UnboundedSender<CancelMsg>,
}

impl ConfirmationEvent {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> Option<TxConfirmation> {
        self.conf.await.ok()
    }

    pub fn cancel(&self) {
        let _ = self.cancels.send(CancelMsg::Conf { id: self.id });
    }
}

/// Handle for a block epoch subscription. Epochs arrive in the order the
/// notifier observed blocks; the stream ends after cancel or shutdown.
pub struct BlockEpochEvent {
    id: u64,
    epochs: mpsc::Receiver<BlockEpoch>,
    cancels: mpsc::UnboundedSender<CancelMsg>,
}

impl BlockEpochEvent {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn next(&mut self) -> Option<BlockEpoch> {
        self.epochs.recv().await
    }

    pub fn cancel(&self) {
        let _ = self.cancels.send(CancelMsg::Epoch { id: self.id });
    }
}

/// The chain notifier front. Turns raw backend block/tx callbacks into
/// ordered, cancellable subscriptions: spends of outpoints, confirmations to
/// depth N and block epochs. All state lives in a single dispatcher task.
pub struct ChainNotifier {
    backend: Arc<dyn ChainBackend>,
    registry_tx: mpsc::Sender<Registration>,
    registry_rx: Option<mpsc::Receiver<Registration>>,
    cancel_tx: mpsc::UnboundedSender<CancelMsg>,
    cancel_rx: Option<mpsc::UnboundedReceiver<CancelMsg>>,
    chain_tx: mpsc::UnboundedSender<ChainUpdate>,
    chain_rx: Option<mpsc::UnboundedReceiver<ChainUpdate>>,
    tx_tx: mpsc::UnboundedSender<TxUpdate>,
    tx_rx: Option<mpsc::UnboundedReceiver<TxUpdate>>,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl ChainNotifier {
    pub fn new(backend: Arc<dyn ChainBackend>) -> Self {
        let (registry_tx, registry_rx) = mpsc::channel(REGISTRY_QUEUE_SIZE);
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let (chain_tx, chain_rx) = mpsc::unbounded_channel();
        let (tx_tx, tx_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        ChainNotifier {
            backend,
            registry_tx,
            registry_rx: Some(registry_rx),
            cancel_tx,
            cancel_rx: Some(cancel_rx),
            chain_tx,
            chain_rx: Some(chain_rx),
            tx_tx,
            tx_rx: Some(tx_rx),
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    /// Queries the backend tip and spawns the dispatcher task.
    pub async fn start(&mut self) -> Result<(), Error> {
        let (registry_rx, cancel_rx, chain_rx, tx_rx) = match (
            self.registry_rx.take(),
            self.cancel_rx.take(),
            self.chain_rx.take(),
            self.tx_rx.take(),
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return Err(Error::AlreadyStarted),
        };
        let (best_hash, best_height) = self.backend.best_block().await?;
        self.backend.notify_blocks().await?;
        info!(
            "chain notifier starting at height {} ({})",
            best_height, best_hash
        );
        let dispatcher = Dispatcher {
            backend: Arc::clone(&self.backend),
            current_height: best_height,
            best_hash,
            spend_subs: HashMap::new(),
            epoch_subs: HashMap::new(),
            conf_tracker: ConfirmationTracker::new(best_height),
            registry_rx,
            cancel_rx,
            chain_rx,
            tx_rx,
            tx_tx: self.tx_tx.clone(),
            shutdown_rx: self.shutdown.subscribe(),
        };
        tokio::spawn(dispatcher.run());
        Ok(())
    }

    /// Signals shutdown: the dispatcher closes every subscriber channel
    /// without delivering a value.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Backend callback: a block was connected to the main chain.
    pub fn block_connected(&self, hash: BlockHash, height: u32) {
        let _ = self.chain_tx.send(ChainUpdate {
            hash,
            height,
            kind: ChainUpdateKind::Connected,
        });
    }

    /// Backend callback: the tip block was disconnected.
    pub fn block_disconnected(&self, hash: BlockHash, height: u32) {
        let _ = self.chain_tx.send(ChainUpdate {
            hash,
            height,
            kind: ChainUpdateKind::Disconnected,
        });
    }

    /// Backend callback: a transaction spending a watched outpoint was seen,
    /// either in the mempool (`block == None`) or in a block.
    pub fn redeeming_tx(&self, tx: Transaction, block: Option<BlockDetails>) {
        let _ = self.tx_tx.send(TxUpdate { tx, block });
    }

    /// The dispatcher's current view of the tip.
    pub async fn best_block(&self) -> Result<(BlockHash, u32), Error> {
        let (resp, rx) = oneshot::channel();
        self.send_registration(RegistryMsg::BestBlock { resp }).await?;
        rx.await.map_err(|_| Error::ShuttingDown)
    }

    pub async fn register_spend(
        &self,
        outpoint: OutPoint,
        height_hint: u32,
    ) -> Result<SpendEvent, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sink, spend) = oneshot::channel();
        self.send_registration(RegistryMsg::Spend {
            id,
            outpoint,
            height_hint,
            sink,
        })
        .await?;
        Ok(SpendEvent {
            id,
            outpoint,
            spend,
            cancels: self.cancel_tx.clone(),
        })
    }

    pub async fn register_confirmation(
        &self,
        txid: Txid,
        num_confs: u32,
        height_hint: u32,
    ) -> Result<ConfirmationEvent, Error> {
        let num_confs = num_confs.max(1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sink, conf) = oneshot::channel();
        self.send_registration(RegistryMsg::Conf {
            id,
            txid,
            num_confs,
            height_hint,
            sink,
        })
        .await?;
        Ok(ConfirmationEvent {
            id,
            conf,
            cancels: self.cancel_tx.clone(),
        })
    }

    pub async fn register_block_epoch(&self) -> Result<BlockEpochEvent, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<BlockEpoch>();
        let (client_tx, client_rx) = mpsc::channel(EPOCH_CLIENT_QUEUE_SIZE);

        // Forwarder: drains the private queue into the client channel so a
        // slow subscriber never stalls the dispatcher or its peers.
        tokio::spawn(async move {
            while let Some(epoch) = queue_rx.recv().await {
                if client_tx.send(epoch).await.is_err() {
                    break;
                }
            }
        });

        self.send_registration(RegistryMsg::Epoch { id, queue: queue_tx })
            .await?;
        Ok(BlockEpochEvent {
            id,
            epochs: client_rx,
            cancels: self.cancel_tx.clone(),
        })
    }

    async fn send_registration(&self, msg: RegistryMsg) -> Result<(), Error> {
        if *self.shutdown.borrow() {
            return Err(Error::ShuttingDown);
        }
        let (done, admitted) = oneshot::channel();
        self.registry_tx
            .send(Registration { msg, done })
            .await
            .map_err(|_| Error::ShuttingDown)?;
        admitted.await.map_err(|_| Error::ShuttingDown)
    }
}

/// Owns every piece of mutable notifier state; processes one queue item at a
/// time.
struct Dispatcher {
    backend: Arc<dyn ChainBackend>,
    current_height: u32,
    best_hash: BlockHash,
    spend_subs: HashMap<OutPoint, HashMap<u64, oneshot::Sender<SpendDetail>>>,
    epoch_subs: HashMap<u64, mpsc::UnboundedSender<BlockEpoch>>,
    conf_tracker: ConfirmationTracker,
    registry_rx: mpsc::Receiver<Registration>,
    cancel_rx: mpsc::UnboundedReceiver<CancelMsg>,
    chain_rx: mpsc::UnboundedReceiver<ChainUpdate>,
    tx_rx: mpsc::UnboundedReceiver<TxUpdate>,
    tx_tx: mpsc::UnboundedSender<TxUpdate>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            // Biased polling drains backend events before admitting new
            // registrations, so a registration observes every chain update
            // that preceded it.
            tokio::select! {
                biased;
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                Some(update) = self.chain_rx.recv() => self.handle_chain_update(update).await,
                Some(update) = self.tx_rx.recv() => self.handle_tx_update(update),
                Some(registration) = self.registry_rx.recv() => {
                    self.handle_registration(registration.msg).await;
                    let _ = registration.done.send(());
                }
                Some(msg) = self.cancel_rx.recv() => self.handle_cancel(msg),
                else => break,
            }
        }
        info!("chain notifier dispatcher exiting");
        self.conf_tracker.tear_down();
        self.spend_subs.clear();
        self.epoch_subs.clear();
    }

    async fn handle_registration(&mut self, msg: RegistryMsg) {
        match msg {
            RegistryMsg::Spend {
                id,
                outpoint,
                height_hint,
                sink,
            } => {
                self.register_spend(id, outpoint, height_hint, sink).await;
            }
            RegistryMsg::Conf {
                id,
                txid,
                num_confs,
                height_hint,
                sink,
            } => {
                let details = self.historical_conf_details(&txid, height_hint).await;
                self.conf_tracker.register(ConfNtfn {
                    id,
                    txid,
                    num_confs,
                    sink,
                    details,
                });
            }
            RegistryMsg::Epoch { id, queue } => {
                self.epoch_subs.insert(id, queue);
            }
            RegistryMsg::BestBlock { resp } => {
                let _ = resp.send((self.best_hash, self.current_height));
            }
        }
    }

    fn handle_cancel(&mut self, msg: CancelMsg) {
        match msg {
            CancelMsg::Spend { id, outpoint } => {
                if let Some(clients) = self.spend_subs.get_mut(&outpoint) {
                    clients.remove(&id);
                    if clients.is_empty() {
                        self.spend_subs.remove(&outpoint);
                    }
                }
            }
            CancelMsg::Conf { id } => self.conf_tracker.cancel(id),
            CancelMsg::Epoch { id } => {
                self.epoch_subs.remove(&id);
            }
        }
    }

    /// A new spend registration: consult the UTXO set, and when the outpoint
    /// is already gone, kick off a rescan that replays the historical spend
    /// through the regular tx-update path.
    async fn register_spend(
        &mut self,
        id: u64,
        outpoint: OutPoint,
        height_hint: u32,
        sink: oneshot::Sender<SpendDetail>,
    ) {
        if let Err(e) = self.backend.notify_spent(vec![outpoint]).await {
            warn!("unable to register {} with the backend: {}", outpoint, e);
        }
        match self.backend.unspent_output(&outpoint).await {
            Ok(Some(_)) => {
                debug!("outpoint {} still unspent, watching passively", outpoint);
            }
            Ok(None) => {
                if let Some(start) = self.resolve_creation_block(&outpoint, height_hint).await {
                    let backend = Arc::clone(&self.backend);
                    let replay = self.tx_tx.clone();
                    tokio::spawn(async move {
                        match backend.rescan_spends(start, vec![outpoint]).await {
                            Ok(updates) => {
                                for update in updates {
                                    let _ = replay.send(update);
                                }
                            }
                            Err(e) => warn!("historical spend rescan failed: {}", e),
                        }
                    });
                }
            }
            Err(e) => {
                // Transient lookup failures keep the registration alive;
                // tip-driven dispatch remains correct.
                warn!("utxo lookup for {} failed: {}", outpoint, e);
            }
        }
        self.spend_subs.entry(outpoint).or_default().insert(id, sink);
    }

    /// Finds the block that created the watched outpoint, via the backend
    /// tx-index when available, otherwise by scanning from the height hint.
    async fn resolve_creation_block(
        &self,
        outpoint: &OutPoint,
        height_hint: u32,
    ) -> Option<BlockHash> {
        match self.backend.tx_block_hash(&outpoint.txid).await {
            Ok(Some(hash)) => return Some(hash),
            Ok(None) => {}
            Err(e) => {
                warn!("tx-index lookup for {} failed: {}", outpoint.txid, e);
                return None;
            }
        }
        for height in height_hint..=self.current_height {
            let hash = match self.backend.block_hash(height).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("block hash lookup at {} failed: {}", height, e);
                    return None;
                }
            };
            match self.backend.block(&hash).await {
                Ok(block) => {
                    if block
                        .txdata
                        .iter()
                        .any(|tx| tx.compute_txid() == outpoint.txid)
                    {
                        return Some(hash);
                    }
                }
                Err(e) => {
                    warn!("block fetch {} failed: {}", hash, e);
                    return None;
                }
            }
        }
        None
    }

    /// Attempts to resolve where a watched transaction confirmed, before
    /// admitting the registration to the tracker. Failures are swallowed;
    /// the registration then relies on future tip events.
    async fn historical_conf_details(
        &self,
        txid: &Txid,
        _height_hint: u32,
    ) -> Option<TxConfirmation> {
        let hash = match self.backend.tx_block_hash(txid).await {
            Ok(Some(hash)) => hash,
            Ok(None) => return None,
            Err(e) => {
                warn!("historical confirmation lookup for {} failed: {}", txid, e);
                return None;
            }
        };
        match self.backend.block_verbose(&hash).await {
            Ok((height, txids)) => {
                let tx_index = txids.iter().position(|t| t == txid)? as u32;
                Some(TxConfirmation {
                    block_hash: hash,
                    block_height: height,
                    tx_index,
                })
            }
            Err(e) => {
                warn!("block lookup {} failed: {}", hash, e);
                None
            }
        }
    }

    async fn handle_chain_update(&mut self, update: ChainUpdate) {
        match update.kind {
            ChainUpdateKind::Connected => {
                if update.height != self.current_height + 1 {
                    warn!(
                        "out of order block connect: height {}, current height {}",
                        update.height, self.current_height
                    );
                    return;
                }
                let block = match self.backend.block(&update.hash).await {
                    Ok(block) => block,
                    Err(e) => {
                        error!("unable to fetch connected block {}: {}", update.hash, e);
                        return;
                    }
                };
                self.current_height = update.height;
                self.best_hash = update.hash;
                debug!("new tip {} at height {}", update.hash, update.height);

                for (tx_index, tx) in block.txdata.iter().enumerate() {
                    self.check_spends(
                        tx,
                        BlockDetails {
                            hash: update.hash,
                            height: update.height,
                            tx_index: tx_index as u32,
                        },
                    );
                }
                self.conf_tracker
                    .connect_tip(update.hash, update.height, &block.txdata);
                self.notify_epochs(BlockEpoch {
                    hash: update.hash,
                    height: update.height,
                });
            }
            ChainUpdateKind::Disconnected => {
                if update.height != self.current_height {
                    warn!(
                        "out of order block disconnect: height {}, current height {}",
                        update.height, self.current_height
                    );
                    return;
                }
                self.current_height = update.height - 1;
                match self.backend.block_hash(self.current_height).await {
                    Ok(hash) => self.best_hash = hash,
                    Err(e) => warn!(
                        "unable to refresh tip hash at {}: {}",
                        self.current_height, e
                    ),
                }
                self.conf_tracker.disconnect_tip(update.height);
            }
        }
    }

    fn handle_tx_update(&mut self, update: TxUpdate) {
        // Mempool-only sightings carry no block details and are ignored for
        // spend dispatch.
        let Some(block) = update.block else {
            return;
        };
        self.check_spends(
            &update.tx,
            BlockDetails {
                hash: block.hash,
                height: block.height,
                tx_index: block.tx_index,
            },
        );
    }

    fn check_spends(&mut self, tx: &Transaction, block: BlockDetails) {
        let spender_txid = tx.compute_txid();
        for (input_index, input) in tx.input.iter().enumerate() {
            let Some(clients) = self.spend_subs.remove(&input.previous_output) else {
                continue;
            };
            debug!(
                "dispatching spend of {} by {} to {} client(s)",
                input.previous_output,
                spender_txid,
                clients.len()
            );
            for (_, sink) in clients {
                let _ = sink.send(SpendDetail {
                    spent_outpoint: input.previous_output,
                    spender_txid,
                    spending_tx: tx.clone(),
                    spender_input_index: input_index as u32,
                    spending_height: block.height,
                });
            }
        }
    }

    fn notify_epochs(&mut self, epoch: BlockEpoch) {
        self.epoch_subs
            .retain(|_, queue| queue.send(epoch).is_ok());
    }
}
