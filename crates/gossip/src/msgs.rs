use bitcoin::secp256k1::PublicKey;
use bitcoin::BlockHash;

use cygnus_common::ShortChannelId;

/// Wire encoding of short-channel-id lists. Only the sorted plain encoding
/// is supported; ids within a message are sorted ascending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    SortedPlain,
}

/// Asks the peer for every channel confirmed within a block range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryChannelRange {
    pub chain_hash: BlockHash,
    pub first_block_height: u32,
    pub num_blocks: u32,
}

/// One chunk of the answer to [`QueryChannelRange`]; the final chunk carries
/// `complete = true`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyChannelRange {
    pub chain_hash: BlockHash,
    pub first_block_height: u32,
    pub num_blocks: u32,
    pub complete: bool,
    pub encoding: Encoding,
    pub short_chan_ids: Vec<ShortChannelId>,
}

/// Asks the peer for the announcements and updates of specific channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryShortChanIds {
    pub chain_hash: BlockHash,
    pub encoding: Encoding,
    pub short_chan_ids: Vec<ShortChannelId>,
}

/// Terminates the stream of messages answering a [`QueryShortChanIds`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyShortChanIdsEnd {
    pub chain_hash: BlockHash,
    pub complete: bool,
}

/// The peer's declared horizon: it only wants graph updates whose timestamp
/// falls within `[first_timestamp, first_timestamp + timestamp_range]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GossipTimestampRange {
    pub chain_hash: BlockHash,
    pub first_timestamp: u32,
    pub timestamp_range: u32,
}

/// Advertises the existence of a channel and binds its endpoints' node keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelAnnouncement {
    pub chain_hash: BlockHash,
    pub short_channel_id: ShortChannelId,
    pub node_id_1: PublicKey,
    pub node_id_2: PublicKey,
}

/// Advertises the forwarding policy of one direction of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub chain_hash: BlockHash,
    pub short_channel_id: ShortChannelId,
    pub timestamp: u32,
    pub channel_flags: u8,
    pub time_lock_delta: u16,
    pub htlc_minimum_msat: u64,
    pub base_fee_msat: u32,
    pub fee_rate_millionths: u32,
}

/// Advertises node-level metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAnnouncement {
    pub node_id: PublicKey,
    pub timestamp: u32,
    pub alias: String,
}

/// Every gossip message a syncer consumes or emits.
#[derive(Clone, Debug, PartialEq)]
pub enum GossipMsg {
    QueryChannelRange(QueryChannelRange),
    ReplyChannelRange(ReplyChannelRange),
    QueryShortChanIds(QueryShortChanIds),
    ReplyShortChanIdsEnd(ReplyShortChanIdsEnd),
    GossipTimestampRange(GossipTimestampRange),
    ChannelAnnouncement(ChannelAnnouncement),
    ChannelUpdate(ChannelUpdate),
    NodeAnnouncement(NodeAnnouncement),
}

impl GossipMsg {
    pub fn name(&self) -> &'static str {
        match self {
            GossipMsg::QueryChannelRange(_) => "query_channel_range",
            GossipMsg::ReplyChannelRange(_) => "reply_channel_range",
            GossipMsg::QueryShortChanIds(_) => "query_short_chan_ids",
            GossipMsg::ReplyShortChanIdsEnd(_) => "reply_short_chan_ids_end",
            GossipMsg::GossipTimestampRange(_) => "gossip_timestamp_range",
            GossipMsg::ChannelAnnouncement(_) => "channel_announcement",
            GossipMsg::ChannelUpdate(_) => "channel_update",
            GossipMsg::NodeAnnouncement(_) => "node_announcement",
        }
    }
}
