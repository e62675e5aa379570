//! Bitcoin script construction and pattern matching.
//!
//! Only the script shapes this wallet produces and spends are modeled: P2PKH locking and
//! unlocking scripts, and the height-locked variant that prefixes a P2PKH lock with
//! `OP_CHECKLOCKTIMEVERIFY`.

use std::fmt;
use std::io::{self, Read, Write};

use crate::consensus::BlockHeight;
use crate::encoding::Vector;

/// Script opcodes used by this crate.
pub mod op {
    pub const _0: u8 = 0x00;
    pub const PUSHDATA1: u8 = 0x4c;
    pub const PUSHDATA2: u8 = 0x4d;
    pub const DROP: u8 = 0x75;
    pub const DUP: u8 = 0x76;
    pub const EQUALVERIFY: u8 = 0x88;
    pub const RIPEMD160: u8 = 0xa6;
    pub const HASH160: u8 = 0xa9;
    pub const CHECKSIG: u8 = 0xac;
    pub const CHECKLOCKTIMEVERIFY: u8 = 0xb1;
}

/// A serialized script, used inside transparent inputs and outputs of a transaction.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Script(pub Vec<u8>);

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Script").field(&hex::encode(&self.0)).finish()
    }
}

impl Script {
    /// Reads a script with its CompactSize length prefix.
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let script = Vector::read(&mut reader, |r| {
            let mut bytes = [0; 1];
            r.read_exact(&mut bytes).map(|_| bytes[0])
        })?;
        Ok(Script(script))
    }

    /// Writes the script preceded by its CompactSize length prefix.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        Vector::write(&mut writer, &self.0, |w, e| w.write_all(&[*e]))
    }

    /// Returns the length of this script as encoded (including the initial CompactSize).
    pub fn serialized_size(&self) -> usize {
        Vector::serialized_size_of_u8_vec(&self.0)
    }

    /// Returns the raw script bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The standard P2PKH locking script:
    /// `OP_DUP OP_HASH160 <pubkey hash> OP_EQUALVERIFY OP_CHECKSIG`.
    pub fn p2pkh(pubkey_hash: &[u8; 20]) -> Self {
        let mut script = Vec::with_capacity(25);
        script.push(op::DUP);
        script.push(op::HASH160);
        push_slice(&mut script, pubkey_hash);
        script.push(op::EQUALVERIFY);
        script.push(op::CHECKSIG);
        Script(script)
    }

    /// The P2PKH unlocking script: `<sig ‖ hashtype byte> <compressed pubkey>`.
    pub fn p2pkh_sig(sig_with_hashtype: &[u8], pubkey: &[u8; 33]) -> Self {
        let mut script = Vec::with_capacity(2 + sig_with_hashtype.len() + pubkey.len());
        push_slice(&mut script, sig_with_hashtype);
        push_slice(&mut script, pubkey);
        Script(script)
    }

    /// A height-locked P2PKH locking script:
    /// `<unlock height> OP_CHECKLOCKTIMEVERIFY OP_DROP OP_DUP OP_HASH160 <pubkey hash>
    /// OP_EQUALVERIFY OP_CHECKSIG`.
    ///
    /// The unlock height is pushed as a minimally-encoded script number; the spending
    /// transaction must set `nLockTime` to at least this height and use a non-final
    /// input sequence.
    pub fn time_lock(unlock_height: BlockHeight, pubkey_hash: &[u8; 20]) -> Self {
        let height_num = script_num(u32::from(unlock_height) as i64);
        let mut script = Vec::with_capacity(height_num.len() + 28);
        push_slice(&mut script, &height_num);
        script.push(op::CHECKLOCKTIMEVERIFY);
        script.push(op::DROP);
        script.push(op::DUP);
        script.push(op::HASH160);
        push_slice(&mut script, pubkey_hash);
        script.push(op::EQUALVERIFY);
        script.push(op::CHECKSIG);
        Script(script)
    }

    /// Returns the pubkey hash if this is a standard P2PKH locking script.
    pub fn p2pkh_pubkey_hash(&self) -> Option<[u8; 20]> {
        if self.0.len() == 25
            && self.0[0] == op::DUP
            && self.0[1] == op::HASH160
            && self.0[2] == 0x14
            && self.0[23] == op::EQUALVERIFY
            && self.0[24] == op::CHECKSIG
        {
            let mut hash = [0; 20];
            hash.copy_from_slice(&self.0[3..23]);
            Some(hash)
        } else {
            None
        }
    }

    /// Returns the unlock height and pubkey hash if this is a height-locked P2PKH
    /// locking script in the form produced by [`Script::time_lock`].
    pub fn time_lock_parts(&self) -> Option<(BlockHeight, [u8; 20])> {
        // <1-5 byte minimal number push> CLTV DROP, then a 25-byte P2PKH tail.
        let (&push_len, rest) = self.0.split_first()?;
        let push_len = usize::from(push_len);
        if !(1..=5).contains(&push_len) || rest.len() != push_len + 27 {
            return None;
        }
        let (num, tail) = rest.split_at(push_len);
        if tail[0] != op::CHECKLOCKTIMEVERIFY || tail[1] != op::DROP {
            return None;
        }
        let height = read_script_num(num)?;
        let height = BlockHeight::try_from(height).ok()?;
        Script(tail[2..].to_vec())
            .p2pkh_pubkey_hash()
            .map(|hash| (height, hash))
    }
}

/// Appends a data push to a script, selecting the direct-push or PUSHDATA form by length.
fn push_slice(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        n if n < 0x4c => script.push(n as u8),
        n if n <= 0xff => {
            script.push(op::PUSHDATA1);
            script.push(n as u8);
        }
        n => {
            debug_assert!(n <= 0xffff);
            script.push(op::PUSHDATA2);
            script.extend_from_slice(&(n as u16).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
}

/// Minimally encodes an integer as a script number (little-endian, sign-magnitude).
pub(crate) fn script_num(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut out = Vec::with_capacity(5);
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    // The most significant bit carries the sign, so values whose top data bit is set
    // need an extra byte.
    if out[out.len() - 1] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let last = out.len() - 1;
        out[last] |= 0x80;
    }
    out
}

/// Decodes a non-negative minimally-encoded script number.
fn read_script_num(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 5 || bytes[bytes.len() - 1] & 0x80 != 0 {
        // Negative heights never occur in lock scripts this wallet produced.
        return None;
    }
    // Reject padded encodings.
    if bytes[bytes.len() - 1] == 0 && (bytes.len() == 1 || bytes[bytes.len() - 2] & 0x80 == 0) {
        return None;
    }
    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        value |= (*b as i64) << (8 * i);
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::{script_num, Script};
    use crate::consensus::BlockHeight;

    #[test]
    fn p2pkh_layout() {
        let script = Script::p2pkh(&[4; 20]);
        assert_eq!(
            script.0,
            &[
                0x76, 0xa9, 0x14, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04,
                0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x88, 0xac,
            ]
        );
        assert_eq!(script.p2pkh_pubkey_hash(), Some([4; 20]));
    }

    #[test]
    fn script_num_minimal_encoding() {
        assert_eq!(script_num(0), Vec::<u8>::new());
        assert_eq!(script_num(1), vec![0x01]);
        assert_eq!(script_num(127), vec![0x7f]);
        assert_eq!(script_num(128), vec![0x80, 0x00]);
        assert_eq!(script_num(255), vec![0xff, 0x00]);
        assert_eq!(script_num(256), vec![0x00, 0x01]);
        assert_eq!(script_num(880_000), vec![0x80, 0x6d, 0x0d]);
        assert_eq!(script_num(-1), vec![0x81]);
    }

    #[test]
    fn time_lock_round_trip() {
        for height in [1u32, 127, 128, 65_536, 880_000, 16_777_216] {
            let script = Script::time_lock(BlockHeight::from_u32(height), &[9; 20]);
            assert_eq!(
                script.time_lock_parts(),
                Some((BlockHeight::from_u32(height), [9; 20])),
                "height {}",
                height
            );
            // A lock script must never be mistaken for plain P2PKH.
            assert_eq!(script.p2pkh_pubkey_hash(), None);
        }
    }

    #[test]
    fn time_lock_rejects_plain_p2pkh() {
        assert_eq!(Script::p2pkh(&[4; 20]).time_lock_parts(), None);
    }

    #[test]
    fn serialized_size_includes_length_prefix() {
        let script = Script::p2pkh(&[0; 20]);
        assert_eq!(script.serialized_size(), 26);

        let mut buf = Vec::new();
        script.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 26);
        assert_eq!(Script::read(&buf[..]).unwrap(), script);
    }
}
