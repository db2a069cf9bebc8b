use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use bitcoin::BlockHash;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout, Instant};

use cygnus_common::ShortChannelId;

use crate::error::Error;
use crate::graph::ChannelGraph;
use crate::msgs::{
    Encoding, GossipMsg, GossipTimestampRange, QueryChannelRange, QueryShortChanIds,
    ReplyChannelRange, ReplyShortChanIdsEnd,
};
use crate::ratelimit::TokenBucket;

/// Default number of short channel ids per reply chunk for the sorted plain
/// encoding.
pub const DEFAULT_CHUNK_SIZE: usize = 8000;

/// Largest number of ids requested in a single `QueryShortChanIds`.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Replies served without delay before the rate limiter kicks in.
pub const DEFAULT_MAX_UNDELAYED_QUERY_REPLIES: usize = 10;

/// Refill interval of the reply rate limiter.
pub const DEFAULT_DELAYED_QUERY_REPLY_INTERVAL: Duration = Duration::from_secs(5);

/// How long a sync-transition or historical-sync request may wait to be
/// served by the state machine.
pub const SYNC_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocks re-queried behind the highest known channel when starting a
/// regular (non-historical) sync.
pub const CHAN_RANGE_QUERY_BUFFER: u32 = 144;

/// Where the per-peer state machine currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncerState {
    SyncingChans,
    WaitingQueryRangeReply,
    QueryNewChannels,
    WaitingQueryChanReply,
    ChansSynced,
}

/// Whether we asked this peer for a live update stream. Mutable only while
/// the state machine sits in `ChansSynced`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncerRole {
    ActiveSync,
    PassiveSync,
}

/// Transport for messages to the peer; sends are synchronous with respect to
/// protocol ordering.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, msg: GossipMsg) -> Result<(), Error>;
}

/// A message queued for broadcast, together with the peers it was received
/// from.
#[derive(Clone, Debug)]
pub struct PendingBroadcast {
    pub msg: GossipMsg,
    pub senders: HashSet<PublicKey>,
}

/// Per-peer configuration.
#[derive(Clone, Debug)]
pub struct GossipSyncerCfg {
    pub chain_hash: BlockHash,
    pub peer: PublicKey,
    pub role: SyncerRole,
    pub encoding: Encoding,
    pub chunk_size: usize,
    pub batch_size: usize,
    pub max_undelayed_query_replies: usize,
    pub delayed_query_reply_interval: Duration,
    /// Suppresses the channel-graph-syncer task (the peer drives us only).
    pub no_sync_channels: bool,
    /// Suppresses the reply-handler task (we never answer queries).
    pub no_reply_queries: bool,
}

impl GossipSyncerCfg {
    pub fn new(chain_hash: BlockHash, peer: PublicKey) -> Self {
        GossipSyncerCfg {
            chain_hash,
            peer,
            role: SyncerRole::ActiveSync,
            encoding: Encoding::SortedPlain,
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            max_undelayed_query_replies: DEFAULT_MAX_UNDELAYED_QUERY_REPLIES,
            delayed_query_reply_interval: DEFAULT_DELAYED_QUERY_REPLY_INTERVAL,
            no_sync_channels: false,
            no_reply_queries: false,
        }
    }
}

enum SyncRequest {
    Transition {
        role: SyncerRole,
        resp: oneshot::Sender<Result<(), Error>>,
    },
    HistoricalSync {
        resp: oneshot::Sender<Result<(), Error>>,
    },
}

/// Drives the graph-sync protocol against one peer: reconciles channel sets
/// through range and id queries, then gates the live update stream through
/// the peer's declared horizon. The sole entry point for this peer's gossip
/// queries into the local graph.
pub struct GossipSyncer {
    cfg: GossipSyncerCfg,
    graph: Arc<dyn ChannelGraph>,
    sender: Arc<dyn MessageSender>,
    state: Arc<Mutex<SyncerState>>,
    role: Arc<Mutex<SyncerRole>>,
    remote_horizon: Arc<Mutex<Option<GossipTimestampRange>>>,
    gossip_tx: mpsc::UnboundedSender<GossipMsg>,
    gossip_rx: Option<mpsc::UnboundedReceiver<GossipMsg>>,
    query_tx: mpsc::UnboundedSender<GossipMsg>,
    query_rx: Option<mpsc::UnboundedReceiver<GossipMsg>>,
    sync_req_tx: mpsc::Sender<SyncRequest>,
    sync_req_rx: Option<mpsc::Receiver<SyncRequest>>,
    synced: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

impl GossipSyncer {
    pub fn new(
        cfg: GossipSyncerCfg,
        graph: Arc<dyn ChannelGraph>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        let (gossip_tx, gossip_rx) = mpsc::unbounded_channel();
        let (query_tx, query_rx) = mpsc::unbounded_channel();
        let (sync_req_tx, sync_req_rx) = mpsc::channel(1);
        let (synced, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        let role = cfg.role;
        GossipSyncer {
            cfg,
            graph,
            sender,
            state: Arc::new(Mutex::new(SyncerState::SyncingChans)),
            role: Arc::new(Mutex::new(role)),
            remote_horizon: Arc::new(Mutex::new(None)),
            gossip_tx,
            gossip_rx: Some(gossip_rx),
            query_tx,
            query_rx: Some(query_rx),
            sync_req_tx,
            sync_req_rx: Some(sync_req_rx),
            synced,
            shutdown,
        }
    }

    /// Spawns the channel-graph-syncer and reply-handler tasks, unless the
    /// configuration suppresses them.
    pub fn start(&mut self) {
        if !self.cfg.no_sync_channels {
            if let (Some(gossip_rx), Some(sync_req_rx)) =
                (self.gossip_rx.take(), self.sync_req_rx.take())
            {
                let driver = GraphSyncDriver {
                    cfg: self.cfg.clone(),
                    graph: Arc::clone(&self.graph),
                    sender: Arc::clone(&self.sender),
                    state: Arc::clone(&self.state),
                    role: Arc::clone(&self.role),
                    local_horizon: None,
                    buffered_ids: Vec::new(),
                    new_chans: Vec::new(),
                    genesis_sync: false,
                    gossip_rx,
                    sync_req_rx,
                    synced: self.synced.clone(),
                    shutdown_rx: self.shutdown.subscribe(),
                };
                tokio::spawn(driver.run());
            }
        }
        if !self.cfg.no_reply_queries {
            if let Some(query_rx) = self.query_rx.take() {
                let handler = ReplyHandler {
                    cfg: self.cfg.clone(),
                    graph: Arc::clone(&self.graph),
                    sender: Arc::clone(&self.sender),
                    limiter: TokenBucket::new(
                        self.cfg.max_undelayed_query_replies,
                        self.cfg.delayed_query_reply_interval,
                        Instant::now(),
                    ),
                    query_rx,
                    shutdown_rx: self.shutdown.subscribe(),
                };
                tokio::spawn(handler.run());
            }
        }
    }

    /// Stops both tasks; pending requests observe [`Error::SyncerExiting`].
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn state(&self) -> SyncerState {
        *self.state.lock().unwrap()
    }

    pub fn role(&self) -> SyncerRole {
        *self.role.lock().unwrap()
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Resolves once the state machine first reaches `ChansSynced`.
    pub async fn wait_until_synced(&self) {
        let mut rx = self.synced.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Routes a message received from the peer. Sync replies feed the state
    /// machine, queries feed the rate-limited reply handler, and a gossip
    /// timestamp range installs the peer's horizon filter.
    pub async fn process_remote_message(&self, msg: GossipMsg) -> Result<(), Error> {
        if *self.shutdown.borrow() {
            return Err(Error::SyncerExiting);
        }
        match msg {
            GossipMsg::ReplyChannelRange(_) | GossipMsg::ReplyShortChanIdsEnd(_) => self
                .gossip_tx
                .send(msg)
                .map_err(|_| Error::SyncerExiting),
            GossipMsg::QueryChannelRange(_) | GossipMsg::QueryShortChanIds(_) => self
                .query_tx
                .send(msg)
                .map_err(|_| Error::SyncerExiting),
            GossipMsg::GossipTimestampRange(range) => self.apply_gossip_filter(range).await,
            other => {
                debug!(
                    "ignoring {} from {}: graph objects are handled upstream",
                    other.name(),
                    self.cfg.peer
                );
                Ok(())
            }
        }
    }

    /// Requests an active/passive transition. Only served while the state
    /// machine sits in `ChansSynced`; otherwise the request times out.
    pub async fn sync_transition(&self, role: SyncerRole) -> Result<(), Error> {
        let (resp, rx) = oneshot::channel();
        self.submit_request(SyncRequest::Transition { role, resp }, rx)
            .await
    }

    /// Requests a full historical sync (range query from height zero). Only
    /// served in `ChansSynced`.
    pub async fn historical_sync(&self) -> Result<(), Error> {
        let (resp, rx) = oneshot::channel();
        self.submit_request(SyncRequest::HistoricalSync { resp }, rx)
            .await
    }

    async fn submit_request(
        &self,
        req: SyncRequest,
        rx: oneshot::Receiver<Result<(), Error>>,
    ) -> Result<(), Error> {
        let submit = async {
            self.sync_req_tx
                .send(req)
                .await
                .map_err(|_| Error::SyncerExiting)?;
            rx.await.map_err(|_| Error::SyncerExiting)?
        };
        match timeout(SYNC_TRANSITION_TIMEOUT, submit).await {
            Ok(result) => result,
            Err(_) => Err(Error::SyncTransitionTimeout),
        }
    }

    /// Installs the peer's horizon and streams the matching backlog from the
    /// local graph in a background task.
    pub async fn apply_gossip_filter(&self, range: GossipTimestampRange) -> Result<(), Error> {
        *self.remote_horizon.lock().unwrap() = Some(range);
        let backlog = self
            .graph
            .updates_in_horizon(range.first_timestamp, range.timestamp_range)
            .await?;
        if backlog.is_empty() {
            return Ok(());
        }
        debug!(
            "sending {} backlog message(s) to {} for new gossip filter",
            backlog.len(),
            self.cfg.peer
        );
        let sender = Arc::clone(&self.sender);
        tokio::spawn(async move {
            for msg in backlog {
                if let Err(e) = sender.send_message(msg).await {
                    warn!("gossip filter backlog send failed: {}", e);
                    break;
                }
            }
        });
        Ok(())
    }

    /// Forwards the subset of a pending broadcast batch that fits the peer's
    /// declared horizon. Without a declared horizon nothing is sent.
    pub async fn filter_gossip_msgs(&self, batch: &[PendingBroadcast]) -> Result<(), Error> {
        let Some(horizon) = *self.remote_horizon.lock().unwrap() else {
            return Ok(());
        };
        let first = horizon.first_timestamp;
        let last = first.saturating_add(horizon.timestamp_range);
        let in_window = |timestamp: u32| timestamp >= first && timestamp <= last;

        let mut passing = Vec::new();
        for pending in batch {
            // Never echo a message back to a peer that sent it to us.
            if pending.senders.contains(&self.cfg.peer) {
                continue;
            }
            match &pending.msg {
                GossipMsg::ChannelUpdate(update) => {
                    if in_window(update.timestamp) {
                        passing.push(pending.msg.clone());
                    }
                }
                GossipMsg::NodeAnnouncement(node) => {
                    if in_window(node.timestamp) {
                        passing.push(pending.msg.clone());
                    }
                }
                GossipMsg::ChannelAnnouncement(announcement) => {
                    let update_in_batch = batch.iter().any(|other| {
                        matches!(&other.msg, GossipMsg::ChannelUpdate(u)
                            if u.short_channel_id == announcement.short_channel_id
                                && in_window(u.timestamp))
                    });
                    // A bare announcement with no updates anywhere is still
                    // forwarded opportunistically.
                    let pass = update_in_batch || {
                        let known = self
                            .graph
                            .channel_updates(announcement.short_channel_id)
                            .await
                            .unwrap_or_default();
                        known.is_empty() || known.iter().any(|u| in_window(u.timestamp))
                    };
                    if pass {
                        passing.push(pending.msg.clone());
                    }
                }
                _ => {}
            }
        }
        for msg in passing {
            if let Err(e) = self.sender.send_message(msg).await {
                warn!("filtered gossip send to {} failed: {}", self.cfg.peer, e);
            }
        }
        Ok(())
    }
}

/// The state-machine task reconciling our graph with the peer's.
struct GraphSyncDriver {
    cfg: GossipSyncerCfg,
    graph: Arc<dyn ChannelGraph>,
    sender: Arc<dyn MessageSender>,
    state: Arc<Mutex<SyncerState>>,
    role: Arc<Mutex<SyncerRole>>,
    local_horizon: Option<GossipTimestampRange>,
    buffered_ids: Vec<ShortChannelId>,
    new_chans: Vec<ShortChannelId>,
    genesis_sync: bool,
    gossip_rx: mpsc::UnboundedReceiver<GossipMsg>,
    sync_req_rx: mpsc::Receiver<SyncRequest>,
    synced: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GraphSyncDriver {
    fn set_state(&self, state: SyncerState) {
        debug!("gossip syncer for {}: entering {:?}", self.cfg.peer, state);
        *self.state.lock().unwrap() = state;
    }

    fn current_state(&self) -> SyncerState {
        *self.state.lock().unwrap()
    }

    async fn run(mut self) {
        loop {
            match self.current_state() {
                SyncerState::SyncingChans => {
                    if !self.send_range_query().await {
                        return;
                    }
                    self.set_state(SyncerState::WaitingQueryRangeReply);
                }
                SyncerState::WaitingQueryRangeReply => {
                    if !self.wait_range_reply().await {
                        return;
                    }
                }
                SyncerState::QueryNewChannels => {
                    if self.new_chans.is_empty() {
                        self.set_state(SyncerState::ChansSynced);
                        continue;
                    }
                    let take = self.new_chans.len().min(self.cfg.batch_size);
                    let mut batch: Vec<ShortChannelId> =
                        self.new_chans.drain(..take).collect();
                    batch.sort();
                    let query = GossipMsg::QueryShortChanIds(QueryShortChanIds {
                        chain_hash: self.cfg.chain_hash,
                        encoding: self.cfg.encoding,
                        short_chan_ids: batch,
                    });
                    if self.sender.send_message(query).await.is_err() {
                        return;
                    }
                    self.set_state(SyncerState::WaitingQueryChanReply);
                }
                SyncerState::WaitingQueryChanReply => {
                    if !self.wait_chan_reply().await {
                        return;
                    }
                }
                SyncerState::ChansSynced => {
                    if !self.run_synced().await {
                        return;
                    }
                }
            }
        }
    }

    /// Sends the opening range query: from genesis on a historical sync,
    /// otherwise backed off a reorg-safe distance from the highest known
    /// channel.
    async fn send_range_query(&mut self) -> bool {
        let first_block_height = if self.genesis_sync {
            0
        } else {
            match self.graph.highest_channel_height().await {
                Ok(height) => height.saturating_sub(CHAN_RANGE_QUERY_BUFFER),
                Err(e) => {
                    warn!("unable to query highest channel height: {}", e);
                    0
                }
            }
        };
        self.genesis_sync = false;
        self.buffered_ids.clear();
        let query = GossipMsg::QueryChannelRange(QueryChannelRange {
            chain_hash: self.cfg.chain_hash,
            first_block_height,
            num_blocks: u32::MAX - first_block_height,
        });
        info!(
            "gossip syncer for {}: querying channel range from height {}",
            self.cfg.peer, first_block_height
        );
        self.sender.send_message(query).await.is_ok()
    }

    async fn wait_range_reply(&mut self) -> bool {
        let Some(msg) = self.recv_gossip().await else {
            return false;
        };
        let reply = match msg {
            GossipMsg::ReplyChannelRange(reply) => reply,
            other => {
                warn!(
                    "unexpected {} while waiting for a range reply",
                    other.name()
                );
                return true;
            }
        };
        if reply.chain_hash != self.cfg.chain_hash {
            warn!(
                "range reply for wrong chain {} dropped",
                reply.chain_hash
            );
            return true;
        }
        self.buffered_ids.extend(reply.short_chan_ids);
        if !reply.complete {
            return true;
        }
        let buffered = std::mem::take(&mut self.buffered_ids);
        match self.graph.filter_known_chan_ids(buffered).await {
            Ok(unknown) if unknown.is_empty() => {
                info!("gossip syncer for {}: nothing new to query", self.cfg.peer);
                self.set_state(SyncerState::ChansSynced);
            }
            Ok(unknown) => {
                debug!(
                    "gossip syncer for {}: {} unknown channel(s)",
                    self.cfg.peer,
                    unknown.len()
                );
                self.new_chans = unknown;
                self.set_state(SyncerState::QueryNewChannels);
            }
            Err(e) => {
                warn!("unable to filter known channel ids: {}", e);
                self.set_state(SyncerState::ChansSynced);
            }
        }
        true
    }

    async fn wait_chan_reply(&mut self) -> bool {
        let Some(msg) = self.recv_gossip().await else {
            return false;
        };
        match msg {
            GossipMsg::ReplyShortChanIdsEnd(_) => {
                self.set_state(SyncerState::QueryNewChannels);
            }
            other => warn!(
                "unexpected {} while waiting for a channel reply",
                other.name()
            ),
        }
        true
    }

    /// Steady state: announce the local horizon once, then serve transition
    /// and historical-sync requests until shutdown.
    async fn run_synced(&mut self) -> bool {
        if !*self.synced.borrow() {
            let _ = self.synced.send(true);
        }
        if *self.role.lock().unwrap() == SyncerRole::ActiveSync && self.local_horizon.is_none() {
            let range = GossipTimestampRange {
                chain_hash: self.cfg.chain_hash,
                first_timestamp: unix_now(),
                timestamp_range: u32::MAX,
            };
            if self
                .sender
                .send_message(GossipMsg::GossipTimestampRange(range))
                .await
                .is_err()
            {
                return false;
            }
            self.local_horizon = Some(range);
        }
        tokio::select! {
            changed = self.shutdown_rx.changed() => {
                !(changed.is_err() || *self.shutdown_rx.borrow())
            }
            Some(req) = self.sync_req_rx.recv() => {
                match req {
                    SyncRequest::Transition { role, resp } => {
                        let result = self.handle_transition(role).await;
                        let _ = resp.send(result);
                    }
                    SyncRequest::HistoricalSync { resp } => {
                        info!(
                            "gossip syncer for {}: historical sync requested",
                            self.cfg.peer
                        );
                        self.genesis_sync = true;
                        self.set_state(SyncerState::SyncingChans);
                        let _ = resp.send(Ok(()));
                    }
                }
                true
            }
            Some(msg) = self.gossip_rx.recv() => {
                debug!("ignoring {} in steady state", msg.name());
                true
            }
        }
    }

    async fn handle_transition(&mut self, new_role: SyncerRole) -> Result<(), Error> {
        let current = *self.role.lock().unwrap();
        if current == new_role {
            return Ok(());
        }
        let range = match new_role {
            // An explicit empty horizon tells the peer to stop forwarding
            // live updates.
            SyncerRole::PassiveSync => GossipTimestampRange {
                chain_hash: self.cfg.chain_hash,
                first_timestamp: 0,
                timestamp_range: 0,
            },
            SyncerRole::ActiveSync => GossipTimestampRange {
                chain_hash: self.cfg.chain_hash,
                first_timestamp: unix_now(),
                timestamp_range: u32::MAX,
            },
        };
        self.sender
            .send_message(GossipMsg::GossipTimestampRange(range))
            .await?;
        self.local_horizon = Some(range);
        *self.role.lock().unwrap() = new_role;
        info!(
            "gossip syncer for {}: transitioned to {:?}",
            self.cfg.peer, new_role
        );
        Ok(())
    }

    /// Receives the next gossip reply, honoring shutdown. Returns `None`
    /// when the task should exit.
    async fn recv_gossip(&mut self) -> Option<GossipMsg> {
        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        return None;
                    }
                }
                msg = self.gossip_rx.recv() => return msg,
            }
        }
    }
}

/// The task answering the peer's queries, independent of sync state.
struct ReplyHandler {
    cfg: GossipSyncerCfg,
    graph: Arc<dyn ChannelGraph>,
    sender: Arc<dyn MessageSender>,
    limiter: TokenBucket,
    query_rx: mpsc::UnboundedReceiver<GossipMsg>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReplyHandler {
    async fn run(mut self) {
        loop {
            let msg = tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        return;
                    }
                    continue;
                }
                msg = self.query_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => return,
                },
            };

            let delay = self.limiter.acquire(Instant::now());
            if !delay.is_zero() {
                warn!(
                    "rate limiting replies to {}, sleeping {:?}",
                    self.cfg.peer, delay
                );
                tokio::select! {
                    changed = self.shutdown_rx.changed() => {
                        if changed.is_err() || *self.shutdown_rx.borrow() {
                            return;
                        }
                    }
                    _ = sleep(delay) => {}
                }
            }

            let result = match msg {
                GossipMsg::QueryChannelRange(query) => self.reply_channel_range(query).await,
                GossipMsg::QueryShortChanIds(query) => self.reply_short_chan_ids(query).await,
                other => {
                    debug!("reply handler ignoring {}", other.name());
                    Ok(())
                }
            };
            match result {
                Ok(()) => {}
                Err(Error::SyncerExiting) => return,
                Err(e) => warn!("query reply for {} failed: {}", self.cfg.peer, e),
            }
        }
    }

    /// Streams the channels within the queried range in chunks; every chunk
    /// but the last carries `complete = false`.
    async fn reply_channel_range(&self, query: QueryChannelRange) -> Result<(), Error> {
        let mut ids = self
            .graph
            .channel_ids_in_range(query.first_block_height, query.num_blocks)
            .await?;
        ids.sort();

        if ids.is_empty() {
            return self
                .sender
                .send_message(GossipMsg::ReplyChannelRange(ReplyChannelRange {
                    chain_hash: query.chain_hash,
                    first_block_height: query.first_block_height,
                    num_blocks: query.num_blocks,
                    complete: true,
                    encoding: self.cfg.encoding,
                    short_chan_ids: Vec::new(),
                }))
                .await;
        }

        let chunk_size = self.cfg.chunk_size.max(1);
        let last_chunk = (ids.len() - 1) / chunk_size;
        for (index, chunk) in ids.chunks(chunk_size).enumerate() {
            self.sender
                .send_message(GossipMsg::ReplyChannelRange(ReplyChannelRange {
                    chain_hash: query.chain_hash,
                    first_block_height: query.first_block_height,
                    num_blocks: query.num_blocks,
                    complete: index == last_chunk,
                    encoding: self.cfg.encoding,
                    short_chan_ids: chunk.to_vec(),
                }))
                .await?;
        }
        Ok(())
    }

    /// Answers a bulk channel query with the stored announcement, update and
    /// node messages, terminated by an end marker. Queries for the wrong
    /// chain get a single incomplete end marker; empty queries get nothing.
    async fn reply_short_chan_ids(&self, query: QueryShortChanIds) -> Result<(), Error> {
        if query.chain_hash != self.cfg.chain_hash {
            warn!(
                "short chan ids query for wrong chain {} from {}",
                query.chain_hash, self.cfg.peer
            );
            return self
                .sender
                .send_message(GossipMsg::ReplyShortChanIdsEnd(ReplyShortChanIdsEnd {
                    chain_hash: query.chain_hash,
                    complete: false,
                }))
                .await;
        }
        if query.short_chan_ids.is_empty() {
            return Ok(());
        }
        let msgs = self
            .graph
            .fetch_channel_messages(&query.short_chan_ids)
            .await?;
        for msg in msgs {
            self.sender.send_message(msg).await?;
        }
        self.sender
            .send_message(GossipMsg::ReplyShortChanIdsEnd(ReplyShortChanIdsEnd {
                chain_hash: query.chain_hash,
                complete: true,
            }))
            .await
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}
