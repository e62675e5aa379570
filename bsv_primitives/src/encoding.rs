//! Bitcoin-style binary encodings.
//!
//! CompactSize (varint) length prefixes and length-prefixed vectors, as used throughout
//! the raw transaction format.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// The maximum allowed value representable as a `[CompactSize]`
pub const MAX_COMPACT_SIZE: u32 = 0x02000000;

/// Namespace for functions for compact encoding of integers.
///
/// This codec requires integers to be encoded in a canonical form; this is the form that
/// uses the fewest bytes to represent a given value.
pub struct CompactSize;

impl CompactSize {
    /// Reads an integer encoded in compact form.
    pub fn read<R: Read>(mut reader: R) -> io::Result<u64> {
        let flag = reader.read_u8()?;
        match flag {
            n if n < 253 => Ok(n as u64),
            253 => match reader.read_u16::<LittleEndian>()? {
                n if n < 253 => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "non-canonical CompactSize",
                )),
                n => Ok(n as u64),
            },
            254 => match reader.read_u32::<LittleEndian>()? {
                n if n < 0x10000 => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "non-canonical CompactSize",
                )),
                n => Ok(n as u64),
            },
            _ => match reader.read_u64::<LittleEndian>()? {
                n if n < 0x100000000 => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "non-canonical CompactSize",
                )),
                n => Ok(n),
            },
        }
    }

    /// Reads an integer encoded in compact form and performs a conversion to the target
    /// type, rejecting values in excess of [`MAX_COMPACT_SIZE`].
    pub fn read_t<R: Read, T: TryFrom<u64>>(reader: R) -> io::Result<T> {
        let n = Self::read(reader)?;
        if n > MAX_COMPACT_SIZE as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "CompactSize too large",
            ));
        }
        T::try_from(n).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "CompactSize value exceeds range of target type",
            )
        })
    }

    /// Writes the provided `usize` value to the provided Writer in compact form.
    pub fn write<W: Write>(mut writer: W, size: usize) -> io::Result<()> {
        match size as u64 {
            s if s < 253 => writer.write_u8(s as u8),
            s if s <= 0xFFFF => {
                writer.write_u8(253)?;
                writer.write_u16::<LittleEndian>(s as u16)
            }
            s if s <= 0xFFFFFFFF => {
                writer.write_u8(254)?;
                writer.write_u32::<LittleEndian>(s as u32)
            }
            s => {
                writer.write_u8(255)?;
                writer.write_u64::<LittleEndian>(s)
            }
        }
    }

    /// Returns the number of bytes needed to encode the given size in compact form.
    pub fn serialized_size(size: usize) -> usize {
        match size as u64 {
            s if s < 253 => 1,
            s if s <= 0xFFFF => 3,
            s if s <= 0xFFFFFFFF => 5,
            _ => 9,
        }
    }
}

/// Namespace for functions that perform encoding of vectors.
///
/// The length of a vector is encoded in compact form, and precedes its elements.
pub struct Vector;

impl Vector {
    /// Reads a CompactSize-prefixed series of elements into a vector.
    pub fn read<R: Read, E, F>(mut reader: R, func: F) -> io::Result<Vec<E>>
    where
        F: Fn(&mut R) -> io::Result<E>,
    {
        let count: usize = CompactSize::read_t(&mut reader)?;
        (0..count).map(|_| func(&mut reader)).collect()
    }

    /// Writes a slice of values as a CompactSize-prefixed series of elements.
    pub fn write<W: Write, E, F>(mut writer: W, vec: &[E], func: F) -> io::Result<()>
    where
        F: Fn(&mut W, &E) -> io::Result<()>,
    {
        CompactSize::write(&mut writer, vec.len())?;
        vec.iter().try_for_each(|e| func(&mut writer, e))
    }

    /// Returns the serialized size of a CompactSize-prefixed byte vector.
    pub fn serialized_size_of_u8_vec(vec: &[u8]) -> usize {
        CompactSize::serialized_size(vec.len()) + vec.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{CompactSize, Vector};

    #[test]
    fn compact_size_round_trip() {
        for value in [0usize, 1, 252, 253, 254, 0xFFFF, 0x10000, 0x0200_0000] {
            let mut buf = Vec::new();
            CompactSize::write(&mut buf, value).unwrap();
            assert_eq!(buf.len(), CompactSize::serialized_size(value));
            assert_eq!(CompactSize::read(&buf[..]).unwrap(), value as u64);
        }
    }

    #[test]
    fn compact_size_rejects_non_canonical() {
        // 252 encoded with the two-byte form.
        let buf = [253u8, 252, 0];
        assert!(CompactSize::read(&buf[..]).is_err());
    }

    #[test]
    fn vector_round_trip() {
        let data = vec![7u8; 300];
        let mut buf = Vec::new();
        Vector::write(&mut buf, &data, |w, e| {
            use std::io::Write;
            w.write_all(&[*e])
        })
        .unwrap();
        assert_eq!(buf.len(), Vector::serialized_size_of_u8_vec(&data));

        let read = Vector::read(&buf[..], |r| {
            use std::io::Read;
            let mut b = [0; 1];
            r.read_exact(&mut b).map(|_| b[0])
        })
        .unwrap();
        assert_eq!(read, data);
    }
}
