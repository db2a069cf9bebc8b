use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Compact 8-byte identifier of a channel's funding outpoint: the block that
/// confirmed the funding transaction, the transaction's index within that
/// block and the index of the multisig output.
///
/// The derived ordering matches the ascending wire order required by the
/// `SortedPlain` id encoding: block height first, then transaction index,
/// then output index.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
pub struct ShortChannelId {
    pub block_height: u32,
    pub tx_index: u32,
    pub output_index: u16,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid short channel id: {0}")]
pub struct ParseShortChannelIdError(String);

impl ShortChannelId {
    pub fn new(block_height: u32, tx_index: u32, output_index: u16) -> Self {
        ShortChannelId {
            block_height,
            tx_index,
            output_index,
        }
    }

    /// Packs into the canonical `u64`: 3 bytes of height, 3 bytes of
    /// transaction index, 2 bytes of output index.
    pub fn to_u64(&self) -> u64 {
        ((self.block_height as u64 & 0xFF_FFFF) << 40)
            | ((self.tx_index as u64 & 0xFF_FFFF) << 16)
            | self.output_index as u64
    }

    pub fn from_u64(id: u64) -> Self {
        ShortChannelId {
            block_height: ((id >> 40) & 0xFF_FFFF) as u32,
            tx_index: ((id >> 16) & 0xFF_FFFF) as u32,
            output_index: (id & 0xFFFF) as u16,
        }
    }
}

impl fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.block_height, self.tx_index, self.output_index
        )
    }
}

impl FromStr for ShortChannelId {
    type Err = ParseShortChannelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('x');
        let mut next = || {
            parts
                .next()
                .ok_or_else(|| ParseShortChannelIdError(s.to_string()))
        };
        let block_height = next()?
            .parse()
            .map_err(|_| ParseShortChannelIdError(s.to_string()))?;
        let tx_index = next()?
            .parse()
            .map_err(|_| ParseShortChannelIdError(s.to_string()))?;
        let output_index = next()?
            .parse()
            .map_err(|_| ParseShortChannelIdError(s.to_string()))?;
        if parts.next().is_some() {
            return Err(ParseShortChannelIdError(s.to_string()));
        }
        Ok(ShortChannelId {
            block_height,
            tx_index,
            output_index,
        })
    }
}

impl From<u64> for ShortChannelId {
    fn from(id: u64) -> Self {
        ShortChannelId::from_u64(id)
    }
}

impl From<ShortChannelId> for u64 {
    fn from(id: ShortChannelId) -> Self {
        id.to_u64()
    }
}
