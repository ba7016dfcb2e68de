//! # Wire & Disk Codec
//!
//! One self-describing codec for everything: network frames, persisted
//! blocks, account records. The reference codec is JSON: human-inspectable,
//! stable across languages, and good enough for a chain whose design goal is
//! legibility.
//!
//! Every encode and decode in the crate funnels through these two functions.
//! That makes the codec a one-module swap: a deployment that wants a binary
//! encoding changes this file and redeploys every peer together. Mixing
//! codecs across peers is a configuration error, not a supported mode.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A value could not be encoded or a byte payload could not be decoded.
///
/// On the receive path this means a malformed wire message or a corrupt disk
/// record; callers log it and drop the offending input.
#[derive(Debug, thiserror::Error)]
#[error("codec error: {0}")]
pub struct CodecError(#[from] serde_json::Error);

/// Encodes a value into its canonical byte representation.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a value from bytes produced by [`encode`] (on any peer).
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}
