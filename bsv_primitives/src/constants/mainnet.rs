//! Constants for the BSV main network.

/// The mainnet coin type for BSV, as defined by [SLIP 44].
///
/// [SLIP 44]: https://github.com/satoshilabs/slips/blob/master/slip-0044.md
pub const COIN_TYPE: u32 = 236;

/// The version byte for a Base58Check-encoded mainnet P2PKH address.
pub const B58_PUBKEY_ADDRESS_PREFIX: u8 = 0x00;

/// The version byte for a Base58Check-encoded mainnet WIF private key.
pub const WIF_PREFIX: u8 = 0x80;
