use serde::{Deserialize, Serialize};

pub const SATOSHI: u64 = 1;
pub const BITCOIN: u64 = 100_000_000 * SATOSHI;
pub const MILLI_BITCOIN: u64 = BITCOIN / 1000;

/// Weight of a commitment transaction with no HTLC outputs, in weight units.
pub const COMMITMENT_TX_WEIGHT: u64 = 724;

/// Fee rate expressed in satoshis per virtual byte. Used for on-chain
/// transactions we author ourselves (funding transactions).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct SatPerVbyte(pub u64);

impl SatPerVbyte {
    /// Total fee for a transaction of `vsize` virtual bytes.
    pub fn fee_for_vsize(&self, vsize: u64) -> u64 {
        self.0 * vsize
    }
}

/// Fee rate expressed in satoshis per 1000 weight units, the unit commitment
/// transaction fees are negotiated in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct SatPerKw(pub u64);

impl SatPerKw {
    /// Fee for a transaction of the given weight, rounded down as consensus
    /// fee computation does.
    pub fn fee_for_weight(&self, weight: u64) -> u64 {
        self.0 * weight / 1000
    }

    /// Fee carried by a commitment transaction without HTLCs.
    pub fn commit_fee(&self) -> u64 {
        self.fee_for_weight(COMMITMENT_TX_WEIGHT)
    }
}
