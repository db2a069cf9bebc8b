use bitcoin::{BlockHash, Txid};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned by every public API once shutdown has been signalled.
    #[error("chain subsystem is shutting down")]
    ShuttingDown,
    #[error("chain notifier was already started")]
    AlreadyStarted,
    #[error("chain backend failure: {0}")]
    Backend(String),
    #[error("transaction not found: {0}")]
    TransactionNotFound(Txid),
    #[error("header height not found: {0}")]
    HeaderHeightNotFound(u32),
    #[error("header hash not found: {0}")]
    HeaderHashNotFound(BlockHash),
}
