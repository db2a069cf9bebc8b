use bitcoin::hashes::Hash;
use bitcoin::key::CompressedPublicKey;
use bitcoin::opcodes::all::{
    OP_CHECKMULTISIG, OP_CHECKSIG, OP_CSV, OP_DROP, OP_ELSE, OP_ENDIF, OP_IF, OP_PUSHNUM_2,
};
use bitcoin::script::Builder;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey, Signing, Verification};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, ScriptBuf, Transaction, TxOut, Witness};

use crate::error::Error;

/// The 2-of-2 witness script of the funding output. Keys are ordered by
/// their serialized compressed form, so both sides construct the identical
/// script regardless of argument order.
pub fn funding_witness_script(a: &PublicKey, b: &PublicKey) -> ScriptBuf {
    let (first, second) = if a.serialize() <= b.serialize() {
        (a, b)
    } else {
        (b, a)
    };
    Builder::new()
        .push_opcode(OP_PUSHNUM_2)
        .push_slice(first.serialize())
        .push_slice(second.serialize())
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// P2WSH script pubkey committing to the funding witness script.
pub fn funding_script_pubkey(witness_script: &ScriptBuf) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&witness_script.wscript_hash())
}

/// The revocable, CSV-delayed balance output of a commitment transaction:
/// spendable immediately with the revocation key, or by the holder after the
/// delay.
pub fn to_local_script(
    revocation_key: &PublicKey,
    delay_key: &PublicKey,
    csv_delay: u16,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_IF)
        .push_slice(revocation_key.serialize())
        .push_opcode(OP_ELSE)
        .push_int(csv_delay as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_slice(delay_key.serialize())
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// P2WPKH script pubkey for a compressed key.
pub fn p2wpkh_script(key: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&CompressedPublicKey(*key).wpubkey_hash())
}

/// Signs a P2WPKH input and assembles its witness.
pub fn sign_p2wpkh_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    prev_output: &TxOut,
    key: &SecretKey,
) -> Result<Witness, Error> {
    let script_pubkey = p2wpkh_script(&PublicKey::from_secret_key(secp, key));
    let sighash = SighashCache::new(tx)
        .p2wpkh_signature_hash(
            input_index,
            &script_pubkey,
            prev_output.value,
            EcdsaSighashType::All,
        )
        .map_err(|e| Error::Commitment(e.to_string()))?;
    let msg = Message::from_digest(sighash.to_byte_array());
    let sig = secp.sign_ecdsa(&msg, key);
    Ok(p2wpkh_witness(&sig, &PublicKey::from_secret_key(secp, key)))
}

/// Assembles the two-element P2WPKH witness stack.
pub fn p2wpkh_witness(sig: &Signature, key: &PublicKey) -> Witness {
    let mut sig_bytes = sig.serialize_der().to_vec();
    sig_bytes.push(EcdsaSighashType::All as u8);
    let mut witness = Witness::new();
    witness.push(&sig_bytes);
    witness.push(key.serialize());
    witness
}

/// Verifies the witness attached to a P2WPKH (or nested P2WPKH) funding
/// input against the output it spends. Structural checks plus an ECDSA
/// verification over the BIP-143 sighash.
pub fn verify_p2wpkh_spend<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    prev_output: &TxOut,
) -> Result<(), Error> {
    let input = tx
        .input
        .get(input_index)
        .ok_or_else(|| Error::InputScriptInvalid("input index out of range".to_string()))?;
    let witness = &input.witness;
    if witness.len() != 2 {
        return Err(Error::InputScriptInvalid(format!(
            "expected 2 witness items, got {}",
            witness.len()
        )));
    }
    let sig_bytes = witness
        .nth(0)
        .ok_or_else(|| Error::InputScriptInvalid("missing signature".to_string()))?;
    let key_bytes = witness
        .nth(1)
        .ok_or_else(|| Error::InputScriptInvalid("missing public key".to_string()))?;
    let key = PublicKey::from_slice(key_bytes)
        .map_err(|_| Error::InputScriptInvalid("malformed public key".to_string()))?;

    let expected = p2wpkh_script(&key);
    let native = prev_output.script_pubkey == expected;
    let nested = prev_output.script_pubkey.is_p2sh()
        && input.script_sig.as_bytes().get(1..) == Some(expected.as_bytes());
    if !native && !nested {
        return Err(Error::InputScriptInvalid(
            "witness key does not match previous output".to_string(),
        ));
    }

    let (hash_type, der) = sig_bytes
        .split_last()
        .ok_or_else(|| Error::InputScriptInvalid("empty signature".to_string()))?;
    if *hash_type != EcdsaSighashType::All as u8 {
        return Err(Error::InputScriptInvalid(format!(
            "unexpected sighash type {:#x}",
            hash_type
        )));
    }
    let sig = Signature::from_der(der)
        .map_err(|_| Error::InputScriptInvalid("malformed DER signature".to_string()))?;

    let sighash = SighashCache::new(tx)
        .p2wpkh_signature_hash(
            input_index,
            &expected,
            prev_output.value,
            EcdsaSighashType::All,
        )
        .map_err(|e| Error::Commitment(e.to_string()))?;
    let msg = Message::from_digest(sighash.to_byte_array());
    secp.verify_ecdsa(&msg, &sig, &key)
        .map_err(|_| Error::InputScriptInvalid("signature verification failed".to_string()))
}

/// Signs the single funding input of a commitment transaction with our
/// multisig key.
pub fn sign_commitment<C: Signing>(
    secp: &Secp256k1<C>,
    commitment_tx: &Transaction,
    funding_witness_script: &ScriptBuf,
    capacity: u64,
    multisig_key: &SecretKey,
) -> Result<Signature, Error> {
    let msg = commitment_sighash(commitment_tx, funding_witness_script, capacity)?;
    Ok(secp.sign_ecdsa(&msg, multisig_key))
}

/// Verifies the counterparty's signature over a commitment transaction.
pub fn verify_commitment_sig<C: Verification>(
    secp: &Secp256k1<C>,
    commitment_tx: &Transaction,
    funding_witness_script: &ScriptBuf,
    capacity: u64,
    sig: &Signature,
    key: &PublicKey,
) -> Result<(), Error> {
    let msg = commitment_sighash(commitment_tx, funding_witness_script, capacity)?;
    secp.verify_ecdsa(&msg, sig, key)
        .map_err(|_| Error::SignatureInvalid)
}

fn commitment_sighash(
    commitment_tx: &Transaction,
    funding_witness_script: &ScriptBuf,
    capacity: u64,
) -> Result<Message, Error> {
    let sighash = SighashCache::new(commitment_tx)
        .p2wsh_signature_hash(
            0,
            funding_witness_script,
            Amount::from_sat(capacity),
            EcdsaSighashType::All,
        )
        .map_err(|e| Error::Commitment(e.to_string()))?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}
