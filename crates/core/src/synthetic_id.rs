// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Packing two identifiers into one integer slot.

use crate::error::{Error, Result};

/// Multiplier separating the primary and secondary parts.
pub const SYNTHETIC_ID_FACTOR: u64 = 1_000_000;

/// Encodes `(primary, secondary)` as `primary * 1_000_000 + secondary`.
pub fn encode_synthetic_id(primary: u64, secondary: u64) -> Result<u64> {
    if secondary >= SYNTHETIC_ID_FACTOR {
        return Err(Error::SyntheticIdOutOfRange(secondary));
    }
    primary
        .checked_mul(SYNTHETIC_ID_FACTOR)
        .and_then(|base| base.checked_add(secondary))
        .ok_or(Error::SyntheticIdOverflow(primary))
}

/// Splits a synthetic id back into `(primary, secondary)`.
pub fn decode_synthetic_id(id: u64) -> (u64, u64) {
    (id / SYNTHETIC_ID_FACTOR, id % SYNTHETIC_ID_FACTOR)
}

#[cfg(test)]
#[path = "synthetic_id_tests.rs"]
mod tests;
