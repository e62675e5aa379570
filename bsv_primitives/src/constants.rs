//! Network-specific BSV constants.

pub mod mainnet;
pub mod testnet;

/// The transaction version produced by this crate's builders.
pub const TX_VERSION: u32 = 1;

/// The sequence number used for inputs that opt out of locktime enforcement.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// A non-final sequence number, required on inputs of transactions that rely on
/// `nLockTime` (such as spends of height-locked outputs).
pub const SEQUENCE_NON_FINAL: u32 = 0xffff_fffe;
