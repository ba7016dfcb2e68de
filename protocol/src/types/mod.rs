//! Fixed-width identifier types shared across the whole crate.
//!
//! `Hash` (32 bytes) names blocks and transactions; `Address` (20 bytes)
//! names accounts. Both print as lowercase hex without a prefix and both
//! accept an optional `0x` prefix when parsed, so operator input copied from
//! other tooling round-trips cleanly.

mod address;
mod hash;

pub use address::Address;
pub use hash::Hash;

/// Errors produced when parsing or reconstructing fixed-width identifiers.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("invalid {kind} length: expected {expected} bytes, got {got}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Strips an optional `0x` / `0X` prefix from a hex string.
pub(crate) fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}
