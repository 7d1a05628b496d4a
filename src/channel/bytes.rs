//! Serde adapter for pixel and asset payloads.
//!
//! Byte fields are written as one base64 string instead of a JSON number array, which keeps a
//! full-surface readback well inside [`super::wire::MAX_FRAME_BYTES`]. Plain arrays are still
//! accepted on input so hand-written fixtures stay readable.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Encoded {
    Text(String),
    Raw(Vec<u8>),
}

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    match Encoded::deserialize(deserializer)? {
        Encoded::Text(text) => STANDARD.decode(text.as_bytes()).map_err(D::Error::custom),
        Encoded::Raw(bytes) => Ok(bytes),
    }
}
