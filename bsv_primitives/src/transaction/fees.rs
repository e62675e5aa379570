//! Fee computation for transactions this crate constructs.
//!
//! Sizes are deterministic functions of the input/output counts and script lengths, so
//! fees are exact rather than estimated: a signed P2PKH input serializes to 148 bytes,
//! a P2PKH output to 34 bytes, and the version/locktime/count framing to 10 bytes.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::encoding::CompactSize;
use crate::value::{Satoshis, MAX_MONEY};

/// The serialized size of a signed P2PKH input: outpoint (36), script length (1),
/// signature push (73 worst case), pubkey push (34), sequence (4).
pub const P2PKH_INPUT_SIZE: usize = 148;

/// The serialized size of a P2PKH output: value (8), script length (1), script (25).
pub const P2PKH_OUTPUT_SIZE: usize = 34;

/// The framing bytes of a small transaction: version (4), locktime (4), and one-byte
/// input and output counts.
pub const TX_OVERHEAD: usize = 10;

/// Change at or below this value is folded into the fee instead of creating an output.
pub const DUST_THRESHOLD: Satoshis = Satoshis::const_from_u64(100);

/// A fee rate in satoshis per 1000 bytes of serialized transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeeRate(u64);

impl FeeRate {
    /// A conservative default of 500 sats per KB (0.5 sat/byte).
    pub const DEFAULT: FeeRate = FeeRate(500);

    pub const fn from_sats_per_kb(rate: u64) -> Self {
        FeeRate(rate)
    }

    pub const fn sats_per_kb(&self) -> u64 {
        self.0
    }

    /// Computes the fee for a transaction of the given serialized size, rounding up,
    /// with a floor of one satoshi.
    pub fn fee_for_size(&self, size: usize) -> Satoshis {
        let fee = (size as u64).saturating_mul(self.0).saturating_add(999) / 1000;
        Satoshis::from_u64(fee.max(1).min(MAX_MONEY))
            .expect("clamped to the valid monetary range")
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        FeeRate::DEFAULT
    }
}

/// Returns the serialized size of a transaction with the given number of P2PKH inputs
/// and P2PKH outputs.
pub fn p2pkh_transaction_size(num_inputs: usize, num_outputs: usize) -> usize {
    TX_OVERHEAD + num_inputs * P2PKH_INPUT_SIZE + num_outputs * P2PKH_OUTPUT_SIZE
}

/// Returns the serialized size of a transaction with the given number of P2PKH inputs
/// and arbitrary output scripts; each output costs `8 + varint(len) + len` bytes.
pub fn transaction_size(num_inputs: usize, output_script_lens: &[usize]) -> usize {
    TX_OVERHEAD
        + num_inputs * P2PKH_INPUT_SIZE
        + output_script_lens
            .iter()
            .map(|len| 8 + CompactSize::serialized_size(*len) + len)
            .sum::<usize>()
}

/// A process-wide, atomically-updatable fee rate.
///
/// Engines read the rate at the start of each operation; updates apply to subsequent
/// operations only.
#[derive(Debug)]
pub struct FeeSettings(AtomicU64);

impl FeeSettings {
    pub const fn new(rate: FeeRate) -> Self {
        FeeSettings(AtomicU64::new(rate.0))
    }

    pub fn fee_rate(&self) -> FeeRate {
        FeeRate(self.0.load(Ordering::Relaxed))
    }

    pub fn set_fee_rate(&self, rate: FeeRate) {
        self.0.store(rate.0, Ordering::Relaxed);
    }
}

impl Default for FeeSettings {
    fn default() -> Self {
        FeeSettings::new(FeeRate::DEFAULT)
    }
}
