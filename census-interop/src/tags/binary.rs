// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Binary serialization of tag contexts, as carried in `grpc-tags-bin`.
//!
//! Layout: a version byte (`0`), then for every tag a field id byte (`0`),
//! a varint key length, the key bytes, a varint value length and the value
//! bytes. Decoding stops at the first field id it does not know.

use super::{TagContext, TagError, TagKey, TagValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::encoding::{decode_varint, encode_varint};

const VERSION_ID: u8 = 0;
const TAG_FIELD_ID: u8 = 0;

/// Upper bound on the summed key and value lengths of one context.
pub const SERIALIZED_SIZE_LIMIT: usize = 8192;

/// Tag context (de)serialization failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TagContextError {
    /// The input was empty.
    #[error("input byte array can not be empty")]
    Empty,
    /// The version byte was not understood.
    #[error("wrong version id: {0}")]
    UnsupportedVersion(u8),
    /// The input ended in the middle of a tag.
    #[error("truncated tag context: {0}")]
    Truncated(&'static str),
    /// The tags exceed [`SERIALIZED_SIZE_LIMIT`].
    #[error("size of tag context exceeds the maximum serialized size {SERIALIZED_SIZE_LIMIT}")]
    TooLarge,
    /// A decoded key or value was not valid UTF-8.
    #[error("tag {0} is not valid utf-8")]
    InvalidUtf8(&'static str),
    /// A decoded key or value failed validation.
    #[error(transparent)]
    InvalidTag(#[from] TagError),
}

/// Converts tag contexts to and from their binary wire form.
///
/// Client and server must share an implementation; only the round trip is
/// contractual.
pub trait TagContextBinarySerializer: Send + Sync {
    /// Serializes `tags`.
    fn to_bytes(&self, tags: &TagContext) -> Result<Bytes, TagContextError>;
    /// Deserializes a context produced by [`Self::to_bytes`].
    fn from_bytes(&self, bytes: &[u8]) -> Result<TagContext, TagContextError>;
}

/// The opencensus binary tag format.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryFormat;

impl TagContextBinarySerializer for BinaryFormat {
    fn to_bytes(&self, tags: &TagContext) -> Result<Bytes, TagContextError> {
        let mut buf = BytesMut::new();
        buf.put_u8(VERSION_ID);
        let mut total = 0;
        for (key, value) in tags.iter() {
            total += key.as_str().len() + value.as_str().len();
            if total > SERIALIZED_SIZE_LIMIT {
                return Err(TagContextError::TooLarge);
            }
            buf.put_u8(TAG_FIELD_ID);
            put_string(&mut buf, key.as_str());
            put_string(&mut buf, value.as_str());
        }
        Ok(buf.freeze())
    }

    fn from_bytes(&self, mut bytes: &[u8]) -> Result<TagContext, TagContextError> {
        if bytes.is_empty() {
            return Err(TagContextError::Empty);
        }
        let version = bytes.get_u8();
        if version != VERSION_ID {
            return Err(TagContextError::UnsupportedVersion(version));
        }
        let mut builder = TagContext::builder();
        let mut total = 0;
        while bytes.has_remaining() {
            if bytes.get_u8() != TAG_FIELD_ID {
                // Fields after an unknown id can't be located.
                break;
            }
            let key = get_string(&mut bytes, "key")?;
            let value = get_string(&mut bytes, "value")?;
            total += key.len() + value.len();
            if total > SERIALIZED_SIZE_LIMIT {
                return Err(TagContextError::TooLarge);
            }
            builder = builder.put(TagKey::new(key)?, TagValue::new(value)?);
        }
        Ok(builder.build())
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    encode_varint(s.len() as u64, buf);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut &[u8], what: &'static str) -> Result<String, TagContextError> {
    let len = decode_varint(buf).map_err(|_| TagContextError::Truncated(what))? as usize;
    if buf.remaining() < len {
        return Err(TagContextError::Truncated(what));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| TagContextError::InvalidUtf8(what))
}
