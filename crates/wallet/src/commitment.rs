use bitcoin::absolute::LockTime;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::{PublicKey, Secp256k1, Verification};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::channel::{ChannelConfig, ChannelType};
use crate::error::Error;
use crate::keys::derive_commitment_key;
use crate::script::{p2wpkh_script, to_local_script};

/// Size of the state-hint obfuscator XOR-folded into a commitment
/// transaction's locktime and sequence fields.
pub const STATE_HINT_SIZE: usize = 6;

/// Highest state number the 48-bit hint can encode.
pub const MAX_STATE_NUM: u64 = (1 << 48) - 1;

/// Obfuscator for a channel: the low 6 bytes of `SHA256(k1 || k2)` over the
/// two payment base keys. Single-funder channels order initiator first;
/// dual-funder channels order by serialized-compressed comparison so both
/// sides derive the same value.
pub fn state_hint_obfuscator(
    chan_type: ChannelType,
    initiator_payment_base: &PublicKey,
    responder_payment_base: &PublicKey,
) -> [u8; STATE_HINT_SIZE] {
    let (k1, k2) = match chan_type {
        ChannelType::SingleFunder => (initiator_payment_base, responder_payment_base),
        ChannelType::DualFunder => {
            if initiator_payment_base.serialize() <= responder_payment_base.serialize() {
                (initiator_payment_base, responder_payment_base)
            } else {
                (responder_payment_base, initiator_payment_base)
            }
        }
    };
    let mut engine = sha256::Hash::engine();
    engine.input(&k1.serialize());
    engine.input(&k2.serialize());
    let digest = sha256::Hash::from_engine(engine).to_byte_array();
    let mut obfuscator = [0u8; STATE_HINT_SIZE];
    obfuscator.copy_from_slice(&digest[26..]);
    obfuscator
}

fn obfuscator_to_u64(obfuscator: [u8; STATE_HINT_SIZE]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[2..].copy_from_slice(&obfuscator);
    u64::from_be_bytes(bytes)
}

/// Embeds the obfuscated state number: the high 24 bits into the funding
/// input's sequence, the low 24 bits into the locktime, with the marker bits
/// that keep both fields consensus-valid.
pub fn set_state_num_hint(
    tx: &mut Transaction,
    state_num: u64,
    obfuscator: [u8; STATE_HINT_SIZE],
) -> Result<(), Error> {
    if tx.input.len() != 1 {
        return Err(Error::Commitment(
            "state hints require a single funding input".to_string(),
        ));
    }
    if state_num > MAX_STATE_NUM {
        return Err(Error::Commitment(format!(
            "state number {} exceeds 48 bits",
            state_num
        )));
    }
    let hint = state_num ^ obfuscator_to_u64(obfuscator);
    tx.input[0].sequence =
        Sequence::from_consensus(0x8000_0000 | ((hint >> 24) & 0xFF_FFFF) as u32);
    tx.lock_time = LockTime::from_consensus(0x2000_0000 | (hint & 0xFF_FFFF) as u32);
    Ok(())
}

/// Recovers the state number embedded by [`set_state_num_hint`].
pub fn get_state_num_hint(tx: &Transaction, obfuscator: [u8; STATE_HINT_SIZE]) -> u64 {
    let sequence = tx.input[0].sequence.to_consensus_u32() as u64;
    let locktime = tx.lock_time.to_consensus_u32() as u64;
    (((sequence & 0xFF_FFFF) << 24) | (locktime & 0xFF_FFFF)) ^ obfuscator_to_u64(obfuscator)
}

/// Sorts inputs and outputs into the canonical deterministic order: inputs
/// by reversed txid then output index, outputs by value then script pubkey.
pub fn sort_canonically(tx: &mut Transaction) {
    tx.input.sort_by(|a, b| {
        let mut ta = a.previous_output.txid.to_byte_array();
        let mut tb = b.previous_output.txid.to_byte_array();
        ta.reverse();
        tb.reverse();
        ta.cmp(&tb)
            .then(a.previous_output.vout.cmp(&b.previous_output.vout))
    });
    tx.output
        .sort_by(|a, b| a.value.cmp(&b.value).then(a.script_pubkey.cmp(&b.script_pubkey)));
}

/// Builds the commitment transaction held by `holder`. The `to_local` output
/// pays the holder's balance behind a revocation-or-delay script; the
/// `to_remote` output pays the counterparty's tweaked payment key directly.
/// Outputs at or below the holder's dust limit are pruned. The result
/// carries the obfuscated state hint and is canonically sorted.
#[allow(clippy::too_many_arguments)]
pub fn build_commitment_tx<C: Verification>(
    secp: &Secp256k1<C>,
    funding_outpoint: OutPoint,
    holder: &ChannelConfig,
    counterparty: &ChannelConfig,
    holder_balance: u64,
    counterparty_balance: u64,
    holder_commitment_point: &PublicKey,
    state_num: u64,
    obfuscator: [u8; STATE_HINT_SIZE],
) -> Result<Transaction, Error> {
    // The counterparty's revocation base is tweaked with the holder's
    // commitment point: revealing the matching secret lets the counterparty
    // claim this output if the holder ever broadcasts a revoked state.
    let revocation_key = derive_commitment_key(
        secp,
        &counterparty.keys.revocation_base,
        holder_commitment_point,
    )?;
    let delay_key =
        derive_commitment_key(secp, &holder.keys.delay_base, holder_commitment_point)?;
    let remote_key =
        derive_commitment_key(secp, &counterparty.keys.payment_base, holder_commitment_point)?;

    let mut outputs = Vec::with_capacity(2);
    if holder_balance > holder.constraints.dust_limit {
        let script = to_local_script(&revocation_key, &delay_key, holder.constraints.csv_delay);
        outputs.push(TxOut {
            value: Amount::from_sat(holder_balance),
            script_pubkey: ScriptBuf::new_p2wsh(&script.wscript_hash()),
        });
    }
    if counterparty_balance > holder.constraints.dust_limit {
        outputs.push(TxOut {
            value: Amount::from_sat(counterparty_balance),
            script_pubkey: p2wpkh_script(&remote_key),
        });
    }

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: funding_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: outputs,
    };
    set_state_num_hint(&mut tx, state_num, obfuscator)?;
    sort_canonically(&mut tx);
    Ok(tx)
}
