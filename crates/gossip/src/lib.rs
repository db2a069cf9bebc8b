pub mod error;
pub mod graph;
pub mod msgs;
pub mod ratelimit;
pub mod syncer;


pub use error::Error;
pub use graph::{ChannelGraph, MemoryGraph};
pub use msgs::{
    ChannelAnnouncement, ChannelUpdate, Encoding, GossipMsg, GossipTimestampRange,
    NodeAnnouncement, QueryChannelRange, QueryShortChanIds, ReplyChannelRange,
    ReplyShortChanIdsEnd,
};
pub use syncer::{
    GossipSyncer, GossipSyncerCfg, MessageSender, PendingBroadcast, SyncerRole, SyncerState,
};
