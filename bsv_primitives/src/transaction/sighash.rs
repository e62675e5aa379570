//! BIP 143-style signature hashing with the BSV fork id.
//!
//! Every signature this crate produces covers all inputs and outputs
//! (`SIGHASH_ALL | SIGHASH_FORKID`); the preimage layout is
//! version ‖ hashPrevouts ‖ hashSequence ‖ outpoint ‖ scriptCode ‖ value ‖
//! sequence ‖ hashOutputs ‖ locktime ‖ sighash type, double-SHA256d.

use byteorder::{LittleEndian, WriteBytesExt};

use super::{double_sha256, Transaction};
use crate::script::Script;
use crate::value::Satoshis;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_FORKID: u32 = 0x40;
pub const SIGHASH_ALL_FORKID: u32 = SIGHASH_ALL | SIGHASH_FORKID;

/// The parts of the input being signed that are not recoverable from the transaction
/// itself: its position, the locking script it spends (the "script code"), and the value
/// of the spent output.
pub struct SignableInput<'a> {
    pub index: usize,
    pub script_code: &'a Script,
    pub value: Satoshis,
}

/// Computes the BIP 143 signature digest for one input of the provided transaction.
///
/// The transaction's `script_sig` fields are ignored, so this may be invoked on a
/// transaction whose inputs have not yet been authorized.
///
/// Panics if `signable.index` is out of bounds for the transaction's inputs.
pub fn signature_hash(tx: &Transaction, hash_type: u32, signable: &SignableInput<'_>) -> [u8; 32] {
    let hash_prevouts = {
        let mut buf = Vec::with_capacity(36 * tx.vin.len());
        for txin in &tx.vin {
            txin.prevout
                .write(&mut buf)
                .expect("writing to a Vec cannot fail");
        }
        double_sha256(&buf)
    };

    let hash_sequence = {
        let mut buf = Vec::with_capacity(4 * tx.vin.len());
        for txin in &tx.vin {
            buf.extend_from_slice(&txin.sequence.to_le_bytes());
        }
        double_sha256(&buf)
    };

    let hash_outputs = {
        let mut buf = Vec::new();
        for txout in &tx.vout {
            txout.write(&mut buf).expect("writing to a Vec cannot fail");
        }
        double_sha256(&buf)
    };

    let txin = &tx.vin[signable.index];

    let mut preimage = Vec::with_capacity(156 + signable.script_code.serialized_size());
    preimage
        .write_u32::<LittleEndian>(tx.version)
        .expect("writing to a Vec cannot fail");
    preimage.extend_from_slice(&hash_prevouts);
    preimage.extend_from_slice(&hash_sequence);
    txin.prevout
        .write(&mut preimage)
        .expect("writing to a Vec cannot fail");
    signable
        .script_code
        .write(&mut preimage)
        .expect("writing to a Vec cannot fail");
    preimage.extend_from_slice(&signable.value.to_u64_le_bytes());
    preimage.extend_from_slice(&txin.sequence.to_le_bytes());
    preimage.extend_from_slice(&hash_outputs);
    preimage.extend_from_slice(&tx.lock_time.to_le_bytes());
    preimage.extend_from_slice(&hash_type.to_le_bytes());

    double_sha256(&preimage)
}
