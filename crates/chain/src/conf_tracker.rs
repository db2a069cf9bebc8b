use std::collections::{BTreeMap, HashMap, HashSet};

use bitcoin::{BlockHash, Transaction, Txid};
use log::{debug, warn};
use tokio::sync::oneshot;

use crate::events::TxConfirmation;
use crate::REORG_SAFETY_LIMIT;

/// A pending "wait for N confirmations" registration. The sink is consumed on
/// dispatch, which is what makes the exactly-once guarantee structural: a
/// notification that has fired cannot fire again.
pub struct ConfNtfn {
    pub id: u64,
    pub txid: Txid,
    pub num_confs: u32,
    pub sink: oneshot::Sender<TxConfirmation>,
    /// Block details once the transaction has been seen in a connected (or
    /// historically resolved) block; cleared again if that block disconnects.
    pub details: Option<TxConfirmation>,
}

/// Tracks pending confirmation registrations across connected and
/// disconnected tips. Owned by the notifier dispatcher; no internal locking.
pub struct ConfirmationTracker {
    current_height: u32,
    reorg_safety_limit: u32,
    /// Pending registrations by id.
    ntfns: HashMap<u64, ConfNtfn>,
    /// Pending registration ids interested in a given txid.
    ids_by_txid: HashMap<Txid, HashSet<u64>>,
    /// Registration ids scheduled to mature at a given height.
    ntfns_by_maturity: BTreeMap<u32, HashSet<u64>>,
    /// Txids first confirmed at a given height, for reorg rewind and pruning.
    txids_by_initial_height: BTreeMap<u32, HashSet<Txid>>,
}

impl ConfirmationTracker {
    pub fn new(start_height: u32) -> Self {
        ConfirmationTracker {
            current_height: start_height,
            reorg_safety_limit: REORG_SAFETY_LIMIT,
            ntfns: HashMap::new(),
            ids_by_txid: HashMap::new(),
            ntfns_by_maturity: BTreeMap::new(),
            txids_by_initial_height: BTreeMap::new(),
        }
    }

    pub fn current_height(&self) -> u32 {
        self.current_height
    }

    pub fn pending_count(&self) -> usize {
        self.ntfns.len()
    }

    /// Admits a registration, dispatching immediately when the historically
    /// resolved details already satisfy the requested depth.
    pub fn register(&mut self, mut ntfn: ConfNtfn) {
        if let Some(details) = ntfn.details {
            if self.confs_at_tip(details.block_height) >= ntfn.num_confs {
                let _ = ntfn.sink.send(details);
                return;
            }
            self.schedule(ntfn.id, ntfn.txid, &details, ntfn.num_confs);
        }
        self.ids_by_txid.entry(ntfn.txid).or_default().insert(ntfn.id);
        self.ntfns.insert(ntfn.id, ntfn);
    }

    /// Removes a registration; its sink is dropped, closing the client
    /// channel without a value. A no-op for unknown or already-fired ids.
    pub fn cancel(&mut self, id: u64) {
        let Some(ntfn) = self.ntfns.remove(&id) else {
            return;
        };
        self.forget(id, ntfn.txid, ntfn.details.as_ref().map(|d| d.block_height));
    }

    /// Records confirmations from a newly connected tip, then dispatches
    /// every registration whose maturity height has been reached.
    pub fn connect_tip(&mut self, hash: BlockHash, height: u32, txns: &[Transaction]) {
        self.current_height = height;

        for (tx_index, tx) in txns.iter().enumerate() {
            let txid = tx.compute_txid();
            let Some(ids) = self.ids_by_txid.get(&txid) else {
                continue;
            };
            let details = TxConfirmation {
                block_hash: hash,
                block_height: height,
                tx_index: tx_index as u32,
            };
            let ids: Vec<u64> = ids.iter().copied().collect();
            for id in ids {
                let Some(ntfn) = self.ntfns.get_mut(&id) else {
                    continue;
                };
                if ntfn.details.is_some() {
                    continue;
                }
                ntfn.details = Some(details);
                let (num_confs, txid) = (ntfn.num_confs, ntfn.txid);
                self.schedule(id, txid, &details, num_confs);
            }
        }

        if let Some(ids) = self.ntfns_by_maturity.remove(&height) {
            for id in ids {
                let Some(ntfn) = self.ntfns.remove(&id) else {
                    continue;
                };
                self.ids_by_txid
                    .get_mut(&ntfn.txid)
                    .map(|set| set.remove(&id));
                if self
                    .ids_by_txid
                    .get(&ntfn.txid)
                    .is_some_and(|set| set.is_empty())
                {
                    self.ids_by_txid.remove(&ntfn.txid);
                }
                match ntfn.details {
                    Some(details) => {
                        debug!(
                            "dispatching {} confirmation(s) for tx {}",
                            ntfn.num_confs, ntfn.txid
                        );
                        let _ = ntfn.sink.send(details);
                    }
                    None => warn!(
                        "confirmation registration {} matured without block details",
                        id
                    ),
                }
            }
        }

        self.prune();
    }

    /// Rewinds the tracker past a disconnected tip: every confirmation
    /// recorded at or above `height` is reverted to unconfirmed.
    pub fn disconnect_tip(&mut self, height: u32) {
        self.current_height = height.saturating_sub(1);

        let stale: Vec<u64> = self
            .ntfns
            .iter()
            .filter(|(_, n)| n.details.is_some_and(|d| d.block_height >= height))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            let Some(ntfn) = self.ntfns.get_mut(&id) else {
                continue;
            };
            let Some(details) = ntfn.details.take() else {
                continue;
            };
            let maturity = details.block_height + ntfn.num_confs - 1;
            if let Some(set) = self.ntfns_by_maturity.get_mut(&maturity) {
                set.remove(&id);
                if set.is_empty() {
                    self.ntfns_by_maturity.remove(&maturity);
                }
            }
        }
        self.txids_by_initial_height.retain(|h, _| *h < height);
    }

    /// Closes every pending sink without a value.
    pub fn tear_down(&mut self) {
        self.ntfns.clear();
        self.ids_by_txid.clear();
        self.ntfns_by_maturity.clear();
        self.txids_by_initial_height.clear();
    }

    fn confs_at_tip(&self, confirmed_height: u32) -> u32 {
        if confirmed_height > self.current_height {
            return 0;
        }
        self.current_height - confirmed_height + 1
    }

    fn schedule(&mut self, id: u64, txid: Txid, details: &TxConfirmation, num_confs: u32) {
        let maturity = details.block_height + num_confs - 1;
        self.ntfns_by_maturity.entry(maturity).or_default().insert(id);
        self.txids_by_initial_height
            .entry(details.block_height)
            .or_default()
            .insert(txid);
    }

    fn forget(&mut self, id: u64, txid: Txid, confirmed_height: Option<u32>) {
        if let Some(set) = self.ids_by_txid.get_mut(&txid) {
            set.remove(&id);
            if set.is_empty() {
                self.ids_by_txid.remove(&txid);
            }
        }
        if confirmed_height.is_some() {
            for set in self.ntfns_by_maturity.values_mut() {
                set.remove(&id);
            }
            self.ntfns_by_maturity.retain(|_, set| !set.is_empty());
        }
    }

    /// Confirmations older than the reorg safety window can never be undone;
    /// forget the bookkeeping that would let us rewind them.
    fn prune(&mut self) {
        let floor = self.current_height.saturating_sub(self.reorg_safety_limit);
        self.txids_by_initial_height.retain(|h, _| *h >= floor);
    }
}
