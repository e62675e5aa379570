//! Structs and methods for handling BSV transactions.

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};

use crate::encoding::Vector;
use crate::script::Script;
use crate::value::Satoshis;

pub mod builder;
pub mod fees;
pub mod sighash;

/// The identifier for a BSV transaction: the double-SHA256 hash of the serialized
/// transaction.
///
/// Byte order note: the hash is stored here in the order it is serialized into
/// transactions (little-endian); the hex form shown by block explorers and indexer
/// APIs is byte-reversed, and that is the order used by [`fmt::Display`] and
/// [`TxId::from_hex`].
#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct TxId([u8; 32]);

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The (byte-flipped) hex string is more useful than the raw bytes, because we can
        // look that up in RPC methods and block explorers.
        let txid_str = self.to_string();
        f.debug_tuple("TxId").field(&txid_str).finish()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = self.0;
        data.reverse();
        formatter.write_str(&hex::encode(data))
    }
}

impl AsRef<[u8; 32]> for TxId {
    fn as_ref(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<TxId> for [u8; 32] {
    fn from(value: TxId) -> Self {
        value.0
    }
}

impl TxId {
    /// Wraps the given byte array as a TxId value.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        TxId(bytes)
    }

    /// Parses a txid from the display form: 64 hex digits in reversed byte order.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(TxId(bytes))
    }

    /// Reads a 32-byte txid directly from the provided reader.
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hash = [0u8; 32];
        reader.read_exact(&mut hash)?;
        Ok(TxId::from_bytes(hash))
    }

    /// Writes the 32-byte payload directly to the provided writer.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.0)?;
        Ok(())
    }
}

/// A reference to the output of an earlier transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutPoint {
    hash: TxId,
    n: u32,
}

impl OutPoint {
    pub fn new(hash: TxId, n: u32) -> Self {
        OutPoint { hash, n }
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let hash = TxId::read(&mut reader)?;
        let n = reader.read_u32::<LittleEndian>()?;
        Ok(OutPoint { hash, n })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.hash.write(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.n)
    }

    pub fn n(&self) -> u32 {
        self.n
    }

    pub fn txid(&self) -> &TxId {
        &self.hash
    }
}

/// A transparent transaction input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxIn {
    pub fn read<R: Read>(mut reader: &mut R) -> io::Result<Self> {
        let prevout = OutPoint::read(&mut reader)?;
        let script_sig = Script::read(&mut reader)?;
        let sequence = reader.read_u32::<LittleEndian>()?;

        Ok(TxIn {
            prevout,
            script_sig,
            sequence,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.prevout.write(&mut writer)?;
        self.script_sig.write(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.sequence)
    }
}

/// A transparent transaction output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: Satoshis,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn read<R: Read>(mut reader: &mut R) -> io::Result<Self> {
        let value = {
            let mut tmp = [0u8; 8];
            reader.read_exact(&mut tmp)?;
            Satoshis::from_u64_le_bytes(tmp)
        }
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "value out of range"))?;
        let script_pubkey = Script::read(&mut reader)?;

        Ok(TxOut {
            value,
            script_pubkey,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.value.to_u64_le_bytes())?;
        self.script_pubkey.write(&mut writer)
    }

    /// Returns the serialized size of this output: the 8-byte value plus the
    /// length-prefixed script.
    pub fn serialized_size(&self) -> usize {
        8 + self.script_pubkey.serialized_size()
    }
}

/// A BSV transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let version = reader.read_u32::<LittleEndian>()?;
        let vin = Vector::read(&mut reader, TxIn::read)?;
        let vout = Vector::read(&mut reader, TxOut::read)?;
        let lock_time = reader.read_u32::<LittleEndian>()?;

        Ok(Transaction {
            version,
            vin,
            vout,
            lock_time,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.version)?;
        Vector::write(&mut writer, &self.vin, |w, input| input.write(w))?;
        Vector::write(&mut writer, &self.vout, |w, output| output.write(w))?;
        writer.write_u32::<LittleEndian>(self.lock_time)
    }

    /// Returns the raw serialized transaction.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.serialized_size());
        self.write(&mut raw)
            .expect("writing to a Vec cannot fail");
        raw
    }

    /// Returns the serialized size of this transaction in bytes.
    pub fn serialized_size(&self) -> usize {
        use crate::encoding::CompactSize;
        8 + CompactSize::serialized_size(self.vin.len())
            + self
                .vin
                .iter()
                .map(|i| 36 + i.script_sig.serialized_size() + 4)
                .sum::<usize>()
            + CompactSize::serialized_size(self.vout.len())
            + self.vout.iter().map(|o| o.serialized_size()).sum::<usize>()
    }

    /// Computes the transaction's identifier: the double-SHA256 hash of its
    /// serialization.
    pub fn txid(&self) -> TxId {
        TxId(double_sha256(&self.to_bytes()))
    }
}

/// Double SHA-256.
pub(crate) fn double_sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0; 32];
    out.copy_from_slice(&Sha256::digest(Sha256::digest(data)));
    out
}

#[cfg(test)]
mod tests {
    use super::{OutPoint, Script, Transaction, TxId, TxIn, TxOut};
    use crate::value::Satoshis;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint::new(TxId::from_bytes([0xaa; 32]), 1),
                script_sig: Script(vec![0x00]),
                sequence: 0xffff_ffff,
            }],
            vout: vec![TxOut {
                value: Satoshis::const_from_u64(5000),
                script_pubkey: Script::p2pkh(&[0; 20]),
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn txid_display_is_byte_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        let txid = TxId::from_bytes(bytes);
        let display = txid.to_string();
        assert!(display.ends_with("01"));
        assert_eq!(TxId::from_hex(&display).unwrap(), txid);
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(TxId::from_hex("abcd").is_err());
        assert!(TxId::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn serialization_round_trip() {
        let tx = sample_tx();
        let bytes = tx.to_bytes();
        assert_eq!(bytes.len(), tx.serialized_size());
        assert_eq!(Transaction::read(&bytes[..]).unwrap(), tx);
    }

    #[test]
    fn txid_is_deterministic() {
        let tx = sample_tx();
        assert_eq!(tx.txid(), tx.txid());
        assert_eq!(tx.txid().to_string().len(), 64);
    }
}
