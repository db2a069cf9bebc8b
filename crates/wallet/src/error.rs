use bitcoin::BlockHash;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned by every API once the engine has begun shutting down.
    #[error("funding engine is shutting down")]
    ShuttingDown,
    #[error("insufficient funds: {available} sat available, {required} sat required")]
    InsufficientFunds { available: u64, required: u64 },
    #[error("chain mismatch: expected {expected}, got {got}")]
    ChainMismatch { expected: BlockHash, got: BlockHash },
    #[error(
        "funder balance of {balance} sat after {fee} sat fee is below the \
         required minimum of {min_required} sat"
    )]
    FunderBalanceDust {
        fee: u64,
        balance: i64,
        min_required: u64,
    },
    #[error("no pending reservation with id {0}")]
    ReservationNotFound(u64),
    #[error("remote commitment signature is invalid")]
    SignatureInvalid,
    #[error("funding input script rejected: {0}")]
    InputScriptInvalid(String),
    #[error("constraint violation: {field} = {value} outside bound {bound}")]
    ConstraintViolation {
        field: &'static str,
        value: u64,
        bound: u64,
    },
    #[error("unexpected funding message: {0}")]
    Protocol(String),
    #[error("revocation secret is inconsistent with previously received secrets")]
    InvalidRevocationSecret,
    #[error("commitment construction failed: {0}")]
    Commitment(String),
    #[error("channel store failure: {0}")]
    Store(String),
    #[error("wallet backend failure: {0}")]
    Wallet(String),
    #[error("crypto failure: {0}")]
    Secp(#[from] bitcoin::secp256k1::Error),
    #[error(transparent)]
    Chain(#[from] cygnus_chain::Error),
}
