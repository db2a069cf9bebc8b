use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;

use cygnus_common::ShortChannelId;

use crate::error::Error;
use crate::msgs::{ChannelAnnouncement, ChannelUpdate, GossipMsg, NodeAnnouncement};

/// The queries the syncer makes against the local channel graph. The graph
/// itself (validation, persistence) lives behind this trait.
#[async_trait]
pub trait ChannelGraph: Send + Sync {
    /// Of the given ids, returns those the local graph does not yet know.
    async fn filter_known_chan_ids(
        &self,
        ids: Vec<ShortChannelId>,
    ) -> Result<Vec<ShortChannelId>, Error>;

    /// Ids of all known channels confirmed within
    /// `[first_block_height, first_block_height + num_blocks)`, ascending.
    async fn channel_ids_in_range(
        &self,
        first_block_height: u32,
        num_blocks: u32,
    ) -> Result<Vec<ShortChannelId>, Error>;

    /// The announcement, channel updates and node announcements for each of
    /// the given channels, in reply order.
    async fn fetch_channel_messages(
        &self,
        ids: &[ShortChannelId],
    ) -> Result<Vec<GossipMsg>, Error>;

    /// Every update and node announcement whose timestamp falls within
    /// `[first_timestamp, first_timestamp + timestamp_range]`.
    async fn updates_in_horizon(
        &self,
        first_timestamp: u32,
        timestamp_range: u32,
    ) -> Result<Vec<GossipMsg>, Error>;

    /// Known updates for a single channel.
    async fn channel_updates(&self, id: ShortChannelId) -> Result<Vec<ChannelUpdate>, Error>;

    /// Height of the highest known channel, 0 when the graph is empty.
    async fn highest_channel_height(&self) -> Result<u32, Error>;
}

#[derive(Default)]
struct GraphState {
    channels: BTreeMap<ShortChannelId, ChannelAnnouncement>,
    updates: BTreeMap<ShortChannelId, Vec<ChannelUpdate>>,
    nodes: HashMap<PublicKey, NodeAnnouncement>,
}

/// In-memory channel graph used by tests and as a reference implementation.
#[derive(Default)]
pub struct MemoryGraph {
    state: RwLock<GraphState>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        MemoryGraph::default()
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, GraphState>, Error> {
        self.state
            .read()
            .map_err(|_| Error::Graph("lock poisoned".to_string()))
    }

    pub fn add_channel(&self, announcement: ChannelAnnouncement) {
        let mut state = self.state.write().unwrap();
        state
            .channels
            .insert(announcement.short_channel_id, announcement);
    }

    pub fn add_update(&self, update: ChannelUpdate) {
        let mut state = self.state.write().unwrap();
        state
            .updates
            .entry(update.short_channel_id)
            .or_default()
            .push(update);
    }

    pub fn add_node(&self, announcement: NodeAnnouncement) {
        let mut state = self.state.write().unwrap();
        state.nodes.insert(announcement.node_id, announcement);
    }
}

#[async_trait]
impl ChannelGraph for MemoryGraph {
    async fn filter_known_chan_ids(
        &self,
        ids: Vec<ShortChannelId>,
    ) -> Result<Vec<ShortChannelId>, Error> {
        let state = self.read_state()?;
        Ok(ids
            .into_iter()
            .filter(|id| !state.channels.contains_key(id))
            .collect())
    }

    async fn channel_ids_in_range(
        &self,
        first_block_height: u32,
        num_blocks: u32,
    ) -> Result<Vec<ShortChannelId>, Error> {
        let end = first_block_height.saturating_add(num_blocks);
        let state = self.read_state()?;
        Ok(state
            .channels
            .keys()
            .filter(|id| id.block_height >= first_block_height && id.block_height < end)
            .copied()
            .collect())
    }

    async fn fetch_channel_messages(
        &self,
        ids: &[ShortChannelId],
    ) -> Result<Vec<GossipMsg>, Error> {
        let state = self.read_state()?;
        let mut msgs = Vec::new();
        for id in ids {
            let Some(announcement) = state.channels.get(id) else {
                continue;
            };
            msgs.push(GossipMsg::ChannelAnnouncement(*announcement));
            if let Some(updates) = state.updates.get(id) {
                msgs.extend(updates.iter().map(|u| GossipMsg::ChannelUpdate(*u)));
            }
            for node_id in [announcement.node_id_1, announcement.node_id_2] {
                if let Some(node) = state.nodes.get(&node_id) {
                    msgs.push(GossipMsg::NodeAnnouncement(node.clone()));
                }
            }
        }
        Ok(msgs)
    }

    async fn updates_in_horizon(
        &self,
        first_timestamp: u32,
        timestamp_range: u32,
    ) -> Result<Vec<GossipMsg>, Error> {
        let last = first_timestamp.saturating_add(timestamp_range);
        let state = self.read_state()?;
        let mut msgs = Vec::new();
        for updates in state.updates.values() {
            msgs.extend(
                updates
                    .iter()
                    .filter(|u| u.timestamp >= first_timestamp && u.timestamp <= last)
                    .map(|u| GossipMsg::ChannelUpdate(*u)),
            );
        }
        for node in state.nodes.values() {
            if node.timestamp >= first_timestamp && node.timestamp <= last {
                msgs.push(GossipMsg::NodeAnnouncement(node.clone()));
            }
        }
        Ok(msgs)
    }

    async fn channel_updates(&self, id: ShortChannelId) -> Result<Vec<ChannelUpdate>, Error> {
        let state = self.read_state()?;
        Ok(state.updates.get(&id).cloned().unwrap_or_default())
    }

    async fn highest_channel_height(&self) -> Result<u32, Error> {
        let state = self.read_state()?;
        Ok(state
            .channels
            .keys()
            .next_back()
            .map(|id| id.block_height)
            .unwrap_or(0))
    }
}
