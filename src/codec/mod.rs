//! Codec module - serialization/deserialization of worker records.
//!
//! - [`JsonLineCodec`] - one JSON object per `\n`-terminated line
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the wire format is fixed at compile time.

mod json_line;

pub use json_line::JsonLineCodec;
