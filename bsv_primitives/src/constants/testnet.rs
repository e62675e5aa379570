//! Constants for the BSV test network.

/// The testnet coin type for all test-network coins, as defined by [SLIP 44].
///
/// [SLIP 44]: https://github.com/satoshilabs/slips/blob/master/slip-0044.md
pub const COIN_TYPE: u32 = 1;

/// The version byte for a Base58Check-encoded testnet P2PKH address.
pub const B58_PUBKEY_ADDRESS_PREFIX: u8 = 0x6f;

/// The version byte for a Base58Check-encoded testnet WIF private key.
pub const WIF_PREFIX: u8 = 0xef;
