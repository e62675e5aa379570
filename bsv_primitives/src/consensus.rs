//! Consensus parameters.

use std::cmp::{Ord, Ordering};
use std::convert::TryFrom;
use std::fmt;
use std::ops::{Add, Sub};

use crate::constants;

/// A wrapper type representing blockchain heights.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockHeight(u32);

/// The height of the genesis block on a network.
pub const H0: BlockHeight = BlockHeight(0);

impl BlockHeight {
    pub const fn from_u32(v: u32) -> BlockHeight {
        BlockHeight(v)
    }

    /// Subtracts the provided value from this height, returning `H0` if this would result
    /// in underflow of the wrapped `u32`.
    pub fn saturating_sub(self, v: u32) -> BlockHeight {
        BlockHeight(self.0.saturating_sub(v))
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl Ord for BlockHeight {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for BlockHeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u32> for BlockHeight {
    fn from(value: u32) -> Self {
        BlockHeight(value)
    }
}

impl TryFrom<i64> for BlockHeight {
    type Error = std::num::TryFromIntError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u32::try_from(value).map(BlockHeight)
    }
}

impl TryFrom<u64> for BlockHeight {
    type Error = std::num::TryFromIntError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        u32::try_from(value).map(BlockHeight)
    }
}

impl From<BlockHeight> for u32 {
    fn from(value: BlockHeight) -> u32 {
        value.0
    }
}

impl From<BlockHeight> for u64 {
    fn from(value: BlockHeight) -> u64 {
        value.0 as u64
    }
}

impl From<BlockHeight> for i64 {
    fn from(value: BlockHeight) -> i64 {
        value.0 as i64
    }
}

impl Add<u32> for BlockHeight {
    type Output = Self;

    fn add(self, other: u32) -> Self {
        BlockHeight(self.0 + other)
    }
}

impl Sub<u32> for BlockHeight {
    type Output = Self;

    fn sub(self, other: u32) -> Self {
        if other > self.0 {
            panic!("Subtraction resulted in negative block height.");
        }

        BlockHeight(self.0 - other)
    }
}

/// BSV network parameters.
///
/// Address and WIF encodings, and the BIP 44 coin type used for key derivation, vary
/// between the main and test networks; everything that encodes or decodes key material
/// takes its prefixes from an implementation of this trait.
pub trait Parameters: Clone {
    /// Returns the BIP 44 coin type for the network.
    fn coin_type(&self) -> u32;

    /// Returns the Base58Check version byte for P2PKH addresses on the network.
    fn b58_pubkey_address_prefix(&self) -> u8;

    /// Returns the Base58Check version byte for WIF-encoded private keys on the network.
    fn wif_prefix(&self) -> u8;

    /// Returns the lowercase name by which the network identifies itself to callers
    /// (e.g. in BRC-100 network-status responses).
    fn network_name(&self) -> &'static str;
}

/// The enumeration of known BSV networks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Network {
    MainNetwork,
    TestNetwork,
}

/// The production network.
pub const MAIN_NETWORK: Network = Network::MainNetwork;

/// The test network.
pub const TEST_NETWORK: Network = Network::TestNetwork;

impl Parameters for Network {
    fn coin_type(&self) -> u32 {
        match self {
            Network::MainNetwork => constants::mainnet::COIN_TYPE,
            Network::TestNetwork => constants::testnet::COIN_TYPE,
        }
    }

    fn b58_pubkey_address_prefix(&self) -> u8 {
        match self {
            Network::MainNetwork => constants::mainnet::B58_PUBKEY_ADDRESS_PREFIX,
            Network::TestNetwork => constants::testnet::B58_PUBKEY_ADDRESS_PREFIX,
        }
    }

    fn wif_prefix(&self) -> u8 {
        match self {
            Network::MainNetwork => constants::mainnet::WIF_PREFIX,
            Network::TestNetwork => constants::testnet::WIF_PREFIX,
        }
    }

    fn network_name(&self) -> &'static str {
        match self {
            Network::MainNetwork => "mainnet",
            Network::TestNetwork => "testnet",
        }
    }
}
