pub mod backend;
pub mod conf_tracker;
pub mod error;
pub mod events;
pub mod notifier;

#[cfg(test)]
mod tests;

pub use backend::ChainBackend;
pub use conf_tracker::{ConfNtfn, ConfirmationTracker};
pub use error::Error;
pub use events::{
    BlockDetails, BlockEpoch, ChainUpdate, ChainUpdateKind, SpendDetail, TxConfirmation, TxUpdate,
};
pub use notifier::{BlockEpochEvent, ChainNotifier, ConfirmationEvent, SpendEvent};

/// Number of blocks after which a recorded confirmation is considered beyond
/// any plausible reorg and may be forgotten by the tracker.
pub const REORG_SAFETY_LIMIT: u32 = 100;
