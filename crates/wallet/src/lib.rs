pub mod channel;
pub mod coin_selection;
pub mod commitment;
pub mod error;
pub mod funder;
pub mod keys;
pub mod reservation;
pub mod revocation;
pub mod script;
pub mod store;
pub mod wallet;

#[cfg(test)]
mod tests;

pub use channel::{
    ChannelConfig, ChannelConstraints, ChannelContribution, ChannelType, CommitmentSnapshot,
    OpenChannel,
};
pub use coin_selection::{select_coins, CoinSelection, Utxo, UtxoKind};
pub use error::Error;
pub use funder::{ContributionSigs, FundingEngine, FundingEngineCfg, FundingReq};
pub use keys::{ChannelKeySecrets, ChannelPublicKeys};
pub use reservation::{ChannelReservation, ReservationState};
pub use revocation::{RevocationProducer, RevocationStore};
pub use store::{ChannelStore, MemoryChannelStore};
pub use wallet::{InputScript, WalletBackend};
