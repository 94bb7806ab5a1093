// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Attaches trace and tag contexts to an outbound call and reconstructs them on
//! the receiving side.
//!
//! Both contexts travel as binary [`Metadata`] entries next to the request:
//! the trace context under [`TRACE_KEY`] and the tag context under [`TAGS_KEY`].

use crate::tags::{BinaryFormat, TagContext, TagContextBinarySerializer, TagContextError};
use crate::trace::{SpanId, TraceContext, TraceFlags, TraceId};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metadata key of the binary trace context.
pub const TRACE_KEY: &str = "grpc-trace-bin";
/// Metadata key of the binary tag context.
pub const TAGS_KEY: &str = "grpc-tags-bin";

const VERSION_ID: u8 = 0;
const TRACE_ID_FIELD_ID: u8 = 0;
const SPAN_ID_FIELD_ID: u8 = 1;
const TRACE_OPTION_FIELD_ID: u8 = 2;
const TRACE_ID_SIZE: usize = 16;
const SPAN_ID_SIZE: usize = 8;
/// Length of an encoded trace context.
pub const TRACE_CONTEXT_SIZE: usize = 1 + 1 + TRACE_ID_SIZE + 1 + SPAN_ID_SIZE + 1 + 1;

/// Binary values carried alongside a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, Bytes>);

impl Metadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Bytes) {
        self.0.insert(key.into(), value);
    }

    /// Gets the value of `key`.
    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.0.get(key)
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &str) -> Option<Bytes> {
        self.0.remove(key)
    }

    /// Returns true if no entries are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Failures decoding a binary trace context.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceContextError {
    /// The version byte was not understood.
    #[error("unsupported trace context version: {0}")]
    UnsupportedVersion(u8),
    /// A mandatory field was missing or out of place.
    #[error("invalid trace context: expected field {0}")]
    MissingField(u8),
    /// The input ended in the middle of a field.
    #[error("truncated trace context")]
    Truncated,
}

/// Encodes `cx` into its 29-byte binary form.
pub fn encode_trace_context(cx: &TraceContext) -> Bytes {
    let mut buf = BytesMut::with_capacity(TRACE_CONTEXT_SIZE);
    buf.put_u8(VERSION_ID);
    buf.put_u8(TRACE_ID_FIELD_ID);
    buf.put_slice(&cx.trace_id.to_bytes());
    buf.put_u8(SPAN_ID_FIELD_ID);
    buf.put_slice(&cx.span_id.to_bytes());
    buf.put_u8(TRACE_OPTION_FIELD_ID);
    buf.put_u8(cx.trace_flags.to_u8());
    buf.freeze()
}

/// Decodes a binary trace context. The options field is optional.
pub fn decode_trace_context(mut bytes: &[u8]) -> Result<TraceContext, TraceContextError> {
    if !bytes.has_remaining() {
        return Err(TraceContextError::Truncated);
    }
    let version = bytes.get_u8();
    if version != VERSION_ID {
        return Err(TraceContextError::UnsupportedVersion(version));
    }
    let mut trace_id = [0u8; TRACE_ID_SIZE];
    read_field(&mut bytes, TRACE_ID_FIELD_ID, &mut trace_id)?;
    let mut span_id = [0u8; SPAN_ID_SIZE];
    read_field(&mut bytes, SPAN_ID_FIELD_ID, &mut span_id)?;
    let mut options = [0u8; 1];
    if bytes.has_remaining() {
        read_field(&mut bytes, TRACE_OPTION_FIELD_ID, &mut options)?;
    }
    Ok(TraceContext::new(TraceId::from_bytes(trace_id), SpanId::from_bytes(span_id), TraceFlags::new(options[0])))
}

fn read_field(bytes: &mut &[u8], field_id: u8, dst: &mut [u8]) -> Result<(), TraceContextError> {
    if !bytes.has_remaining() {
        return Err(TraceContextError::Truncated);
    }
    if bytes.get_u8() != field_id {
        return Err(TraceContextError::MissingField(field_id));
    }
    if bytes.remaining() < dst.len() {
        return Err(TraceContextError::Truncated);
    }
    bytes.copy_to_slice(dst);
    Ok(())
}

/// Contexts reconstructed from inbound metadata.
#[derive(Debug)]
pub struct Extracted {
    /// The propagated trace context, if any was attached.
    pub trace: Option<Result<TraceContext, TraceContextError>>,
    /// The propagated tag context, if any was attached.
    pub tags: Option<Result<TagContext, TagContextError>>,
}

/// Injects and extracts trace and tag contexts using a shared tag serializer.
#[derive(Clone)]
pub struct Propagator {
    serializer: Arc<dyn TagContextBinarySerializer>,
}

impl Default for Propagator {
    fn default() -> Self {
        Self::new(BinaryFormat)
    }
}

impl std::fmt::Debug for Propagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Propagator").finish_non_exhaustive()
    }
}

impl Propagator {
    /// Creates a propagator using `serializer` for tag contexts.
    pub fn new(serializer: impl TagContextBinarySerializer + 'static) -> Self {
        Self { serializer: Arc::new(serializer) }
    }

    /// The tag serializer shared with the peer.
    pub fn serializer(&self) -> &dyn TagContextBinarySerializer {
        &*self.serializer
    }

    /// Writes both contexts into `metadata`.
    pub fn inject(&self, trace: &TraceContext, tags: &TagContext, metadata: &mut Metadata) -> Result<(), TagContextError> {
        metadata.insert(TRACE_KEY, encode_trace_context(trace));
        metadata.insert(TAGS_KEY, self.serializer.to_bytes(tags)?);
        Ok(())
    }

    /// Reads both contexts out of `metadata`.
    pub fn extract(&self, metadata: &Metadata) -> Extracted {
        Extracted {
            trace: metadata.get(TRACE_KEY).map(|b| decode_trace_context(b)),
            tags: metadata.get(TAGS_KEY).map(|b| self.serializer.from_bytes(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample() -> TraceContext {
        let trace_id: [u8; 16] = core::array::from_fn(|i| i as u8);
        TraceContext::new(TraceId::from_bytes(trace_id), SpanId::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]), TraceFlags::SAMPLED)
    }

    #[test]
    fn trace_context_round_trips() {
        let bytes = encode_trace_context(&sample());
        assert_eq!(bytes.len(), TRACE_CONTEXT_SIZE);
        assert_eq!(decode_trace_context(&bytes).unwrap(), sample());
    }

    #[test]
    fn trace_context_layout() {
        let bytes = encode_trace_context(&sample());
        assert_eq!(bytes[0], VERSION_ID);
        assert_eq!(bytes[1], TRACE_ID_FIELD_ID);
        assert_eq!(&bytes[2..18], &sample().trace_id.to_bytes());
        assert_eq!(bytes[18], SPAN_ID_FIELD_ID);
        assert_eq!(&bytes[19..27], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[27..], &[TRACE_OPTION_FIELD_ID, 1]);
    }

    #[test]
    fn trace_options_are_optional() {
        let bytes = encode_trace_context(&sample());
        let cx = decode_trace_context(&bytes[..27]).unwrap();
        assert_eq!(cx.trace_flags, TraceFlags::default());
        assert_eq!(cx.span_id, sample().span_id);
    }

    #[test]
    fn rejects_bad_trace_context() {
        let mut bytes = encode_trace_context(&sample()).to_vec();
        assert_matches!(decode_trace_context(&[]), Err(TraceContextError::Truncated));
        assert_matches!(decode_trace_context(&bytes[..10]), Err(TraceContextError::Truncated));
        bytes[18] = 7;
        assert_matches!(decode_trace_context(&bytes), Err(TraceContextError::MissingField(SPAN_ID_FIELD_ID)));
        bytes[0] = 1;
        assert_matches!(decode_trace_context(&bytes), Err(TraceContextError::UnsupportedVersion(1)));
    }

    #[test]
    fn inject_then_extract() {
        let tags = TagContext::builder().put_str("operation", "interop-test").unwrap().build();
        let propagator = Propagator::default();
        let mut metadata = Metadata::new();
        propagator.inject(&sample(), &tags, &mut metadata).unwrap();
        let extracted = propagator.extract(&metadata);
        assert_eq!(extracted.trace, Some(Ok(sample())));
        assert_eq!(extracted.tags, Some(Ok(tags)));
    }

    #[test]
    fn extract_from_empty_metadata() {
        let extracted = Propagator::default().extract(&Metadata::new());
        assert!(extracted.trace.is_none());
        assert!(extracted.tags.is_none());
    }
}
