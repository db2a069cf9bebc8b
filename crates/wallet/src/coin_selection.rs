use bitcoin::{OutPoint, ScriptBuf};
use serde::{Deserialize, Serialize};

use cygnus_common::SatPerVbyte;

use crate::error::Error;

/// Outputs at or below this value are not worth creating as change; the
/// residual is folded into the fee instead.
pub const CHANGE_DUST_LIMIT: u64 = 546;

/// Virtual size contributions used by the funding-transaction fee estimate.
pub const TX_OVERHEAD_VSIZE: u64 = 11;
pub const P2WPKH_INPUT_VSIZE: u64 = 68;
pub const NESTED_P2WPKH_INPUT_VSIZE: u64 = 91;
pub const P2WSH_OUTPUT_VSIZE: u64 = 43;
pub const P2WPKH_OUTPUT_VSIZE: u64 = 31;

/// A spendable wallet output offered to coin selection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
    pub kind: UtxoKind,
    pub script_pubkey: ScriptBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum UtxoKind {
    WitnessPubkey,
    NestedWitnessPubkey,
}

impl UtxoKind {
    fn input_vsize(&self) -> u64 {
        match self {
            UtxoKind::WitnessPubkey => P2WPKH_INPUT_VSIZE,
            UtxoKind::NestedWitnessPubkey => NESTED_P2WPKH_INPUT_VSIZE,
        }
    }
}

/// Result of a successful selection: the chosen inputs, the change amount
/// (zero when the residual fell below the dust floor) and the fee actually
/// paid.
#[derive(Clone, Debug)]
pub struct CoinSelection {
    pub inputs: Vec<Utxo>,
    pub change: u64,
    pub fee: u64,
}

/// Estimated virtual size of a funding transaction with the given inputs,
/// one P2WSH funding output and one P2WPKH change output.
fn estimate_funding_vsize(inputs: &[Utxo]) -> u64 {
    TX_OVERHEAD_VSIZE
        + inputs.iter().map(|u| u.kind.input_vsize()).sum::<u64>()
        + P2WSH_OUTPUT_VSIZE
        + P2WPKH_OUTPUT_VSIZE
}

/// Greedy selection over `utxos` in the given order, repeated until the
/// accumulated value covers `amount` plus the fee implied by the selection
/// itself.
pub fn select_coins(
    fee_rate: SatPerVbyte,
    amount: u64,
    utxos: &[Utxo],
) -> Result<CoinSelection, Error> {
    let mut needed = amount;
    loop {
        let mut total = 0u64;
        let mut inputs: Vec<Utxo> = Vec::new();
        for utxo in utxos {
            if total >= needed {
                break;
            }
            total += utxo.value;
            inputs.push(utxo.clone());
        }
        if total < needed {
            return Err(Error::InsufficientFunds {
                available: total,
                required: needed,
            });
        }

        let fee = fee_rate.fee_for_vsize(estimate_funding_vsize(&inputs));
        if total - amount < fee {
            needed = amount + fee;
            continue;
        }
        let residual = total - amount - fee;
        return if residual <= CHANGE_DUST_LIMIT {
            Ok(CoinSelection {
                inputs,
                change: 0,
                fee: fee + residual,
            })
        } else {
            Ok(CoinSelection {
                inputs,
                change: residual,
                fee,
            })
        };
    }
}
