//! yEnc article decoding
//!
//! yEnc is the binary-to-near-ASCII encoding used on Usenet: each payload
//! byte is offset by +42 (mod 256), a 4-byte critical set is escaped with
//! `=`, and a trailer carries CRC32 integrity values.
//!
//! [`decode`] turns one dot-unstuffed article body into a
//! [`DecodedSegment`] with its integrity verified; [`encode`] and
//! [`encode_part`] produce well-formed articles (used by the test
//! fixtures and kept as the encoding half of the round-trip law).

mod decode;
mod encode;
mod params;
mod types;

pub use decode::decode;
pub use encode::{encode, encode_part};
pub use types::DecodedSegment;
