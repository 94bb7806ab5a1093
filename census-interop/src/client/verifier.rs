// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Verifies that trace and tag contexts survive an echo round trip.

use crate::echo::{EchoRequest, EchoResponse, ECHO_METHOD};
use crate::tags::{BinaryFormat, TagContext, TagContextBinarySerializer, TagContextError, TagKey, TagValue, METHOD_KEY};
use crate::trace::TraceContext;
use crate::transport::EchoTransport;
use bytes::Bytes;
use std::fmt;
use tracing::{error, info};

/// Values the echoed response must carry, computed before the call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedValues {
    /// Raw bytes of the ambient trace id.
    pub trace_id: Bytes,
    /// The ambient flags in the response's integer encoding.
    pub trace_options: i32,
    /// The ambient tags plus the `method` tag.
    pub tags: TagContext,
}

impl ExpectedValues {
    /// Derives the expectation for a call to `method` made under the given contexts.
    pub fn compute(ambient_trace: &TraceContext, ambient_tags: &TagContext, method: &TagValue) -> Self {
        Self {
            trace_id: Bytes::copy_from_slice(&ambient_trace.trace_id.to_bytes()),
            trace_options: ambient_trace.trace_options(),
            tags: ambient_tags.to_builder().put(TagKey::from_static(METHOD_KEY), method.clone()).build(),
        }
    }
}

/// One failed check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// The echoed trace id differs from the ambient one.
    TraceId {
        /// echoed
        got: Bytes,
        /// expected
        want: Bytes,
    },
    /// The local span id is zero.
    ZeroSpanId,
    /// The echoed trace options differ from the ambient flags.
    TraceOptions {
        /// echoed
        got: i32,
        /// expected
        want: i32,
    },
    /// The echoed tag context differs from the expected one.
    Tags {
        /// echoed
        got: TagContext,
        /// expected
        want: TagContext,
    },
    /// The echoed tag blob does not decode.
    TagsFormat(TagContextError),
    /// The call itself failed.
    Transport(String),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::TraceId { got, want } => write!(f, "Client received bad trace id. got {}, want {}.", hex::encode(got), hex::encode(want)),
            Failure::ZeroSpanId => f.write_str("Client received bad span id. Got 0, want non-zero."),
            Failure::TraceOptions { got, want } => write!(f, "Client received bad trace options. got {got}, want {want}."),
            Failure::Tags { got, want } => write!(f, "Client received wrong TagContext. Got {got}, want {want}."),
            Failure::TagsFormat(e) => write!(f, "Bad binary format for TagContext: {e}"),
            Failure::Transport(e) => write!(f, "Error when sending request: {e}"),
        }
    }
}

/// Outcome of one verification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerificationResult {
    /// True iff every check passed.
    pub passed: bool,
    /// Every failed check, in evaluation order.
    pub failures: Vec<Failure>,
}

impl VerificationResult {
    fn from_failures(failures: Vec<Failure>) -> Self {
        Self { passed: failures.is_empty(), failures }
    }
}

/// Checks `response` against `expected`. All four checks always run.
pub fn verify_response(
    expected: &ExpectedValues,
    ambient_trace: &TraceContext,
    response: &EchoResponse,
    serializer: &impl TagContextBinarySerializer,
) -> VerificationResult {
    let mut failures = Vec::new();
    if response.trace_id != expected.trace_id {
        failures.push(Failure::TraceId {
            got: response.trace_id.clone(),
            want: expected.trace_id.clone(),
        });
    }
    if !ambient_trace.has_valid_span() {
        failures.push(Failure::ZeroSpanId);
    }
    if response.trace_options != expected.trace_options {
        failures.push(Failure::TraceOptions {
            got: response.trace_options,
            want: expected.trace_options,
        });
    }
    match serializer.from_bytes(&response.tags_blob) {
        Ok(tags) if tags == expected.tags => {},
        Ok(tags) => failures.push(Failure::Tags { got: tags, want: expected.tags.clone() }),
        Err(e) => failures.push(Failure::TagsFormat(e)),
    }
    VerificationResult::from_failures(failures)
}

/// Sends one echo call and verifies the propagated context it mirrors back.
#[derive(Debug)]
pub struct PropagationVerifier<T, F = BinaryFormat> {
    transport: T,
    serializer: F,
    method: TagValue,
}

impl<T: EchoTransport> PropagationVerifier<T> {
    /// Creates a verifier calling the echo method over `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            serializer: BinaryFormat,
            method: TagValue::from_static(ECHO_METHOD),
        }
    }
}

impl<T: EchoTransport, F: TagContextBinarySerializer> PropagationVerifier<T, F> {
    /// Replaces the serializer used to decode the echoed tag blob.
    pub fn with_serializer<G: TagContextBinarySerializer>(self, serializer: G) -> PropagationVerifier<T, G> {
        PropagationVerifier {
            transport: self.transport,
            serializer,
            method: self.method,
        }
    }

    /// Sets the full method name to invoke and to expect in the `method` tag.
    pub fn with_method(mut self, method: TagValue) -> Self {
        self.method = method;
        self
    }

    /// The transport calls go through.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Performs the call under the given contexts and checks the response.
    ///
    /// Never fails: transport errors and mismatches are logged and reported
    /// in the result.
    pub async fn perform_call(&self, ambient_trace: &TraceContext, ambient_tags: &TagContext) -> VerificationResult {
        let expected = ExpectedValues::compute(ambient_trace, ambient_tags, &self.method);
        let result = match self.transport.echo(self.method.as_str(), ambient_trace, ambient_tags, EchoRequest::default()).await {
            Ok(response) => verify_response(&expected, ambient_trace, &response, &self.serializer),
            Err(e) => VerificationResult::from_failures(vec![Failure::Transport(format!("{e:?}"))]),
        };
        for failure in &result.failures {
            error!("{failure}");
        }
        if result.passed {
            info!("PASSED.");
        } else {
            info!("FAILED.");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::{CensusEcho, ServerError};
    use crate::propagation::Propagator;
    use crate::tags::{OPERATION_KEY, PROJECT_KEY};
    use crate::trace::{SpanId, TraceFlags, TraceId};
    use crate::transport::{LocalTransport, TransportError};
    use assert_matches::assert_matches;
    use std::sync::Mutex;

    const METHOD: &str = "/echo.EchoService/Echo";

    fn trace_id() -> [u8; 16] {
        core::array::from_fn(|i| i as u8)
    }

    fn ambient_trace() -> TraceContext {
        TraceContext::new(TraceId::from_bytes(trace_id()), SpanId::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]), TraceFlags::SAMPLED)
    }

    fn ambient_tags() -> TagContext {
        TagContext::builder()
            .put_str(OPERATION_KEY, "interop-test")
            .unwrap()
            .put_str(PROJECT_KEY, "open-census")
            .unwrap()
            .build()
    }

    fn echoed_tags() -> Bytes {
        let tags = ambient_tags().to_builder().put_str(METHOD_KEY, METHOD).unwrap().build();
        BinaryFormat.to_bytes(&tags).unwrap()
    }

    fn good_response() -> EchoResponse {
        EchoResponse {
            trace_id: Bytes::copy_from_slice(&trace_id()),
            trace_options: i32::from_be_bytes([0x01, 0, 0, 0]),
            tags_blob: echoed_tags(),
        }
    }

    /// Returns a canned response and records what it was called with.
    struct Canned {
        response: Result<EchoResponse, ServerError>,
        seen: Mutex<Vec<(String, TagContext)>>,
    }

    impl Canned {
        fn new(response: Result<EchoResponse, ServerError>) -> Self {
            Self { response, seen: Mutex::new(Vec::new()) }
        }
    }

    impl EchoTransport for Canned {
        async fn echo(&self, method: &str, _: &TraceContext, tags: &TagContext, _: EchoRequest) -> Result<EchoResponse, TransportError> {
            self.seen.lock().unwrap().push((method.to_owned(), tags.clone()));
            Ok(self.response.clone()?)
        }
    }

    fn verifier(response: EchoResponse) -> PropagationVerifier<Canned> {
        PropagationVerifier::new(Canned::new(Ok(response))).with_method(TagValue::new(METHOD).unwrap())
    }

    #[tokio::test]
    async fn matching_echo_passes_without_details() {
        let verifier = verifier(good_response());
        let result = verifier.perform_call(&ambient_trace(), &ambient_tags()).await;
        assert!(result.passed);
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn method_tag_is_not_sent() {
        let verifier = verifier(good_response());
        verifier.perform_call(&ambient_trace(), &ambient_tags()).await;
        let seen = verifier.transport().seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(METHOD.to_string(), ambient_tags())]);
    }

    #[tokio::test]
    async fn flipped_trace_id_byte_fails_once() {
        let mut response = good_response();
        let mut id = trace_id();
        id[15] ^= 0xff;
        response.trace_id = Bytes::copy_from_slice(&id);
        let result = verifier(response).perform_call(&ambient_trace(), &ambient_tags()).await;
        assert!(!result.passed);
        assert_eq!(result.failures.len(), 1);
        assert_matches!(&result.failures[0], Failure::TraceId { got, .. } if got[15] == 0xf0);
        assert_eq!(
            result.failures[0].to_string(),
            "Client received bad trace id. got 000102030405060708090a0b0c0d0ef0, want 000102030405060708090a0b0c0d0e0f."
        );
    }

    #[tokio::test]
    async fn every_byte_of_the_trace_id_is_compared() {
        for i in 0..16 {
            let mut id = trace_id();
            id[i] = id[i].wrapping_add(1);
            let mut response = good_response();
            response.trace_id = Bytes::copy_from_slice(&id);
            let result = verifier(response).perform_call(&ambient_trace(), &ambient_tags()).await;
            assert_eq!(result.failures.len(), 1, "byte {i}");
        }
    }

    #[tokio::test]
    async fn zero_span_id_fails_sanity_check() {
        let mut trace = ambient_trace();
        trace.span_id = SpanId::INVALID;
        let result = verifier(good_response()).perform_call(&trace, &ambient_tags()).await;
        assert_eq!(result.failures, vec![Failure::ZeroSpanId]);
    }

    #[tokio::test]
    async fn zero_extended_trace_options_fail() {
        let mut response = good_response();
        response.trace_options = 1;
        let result = verifier(response).perform_call(&ambient_trace(), &ambient_tags()).await;
        assert_eq!(result.failures, vec![Failure::TraceOptions { got: 1, want: 0x0100_0000 }]);
    }

    #[tokio::test]
    async fn unsampled_flags_expect_zero() {
        let mut trace = ambient_trace();
        trace.trace_flags = TraceFlags::default();
        let mut response = good_response();
        response.trace_options = 0;
        let result = verifier(response).perform_call(&trace, &ambient_tags()).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn missing_method_tag_fails() {
        let mut response = good_response();
        response.tags_blob = BinaryFormat.to_bytes(&ambient_tags()).unwrap();
        let result = verifier(response).perform_call(&ambient_trace(), &ambient_tags()).await;
        assert_eq!(result.failures.len(), 1);
        assert_matches!(&result.failures[0], Failure::Tags { got, want } if got.len() == 2 && want.len() == 3);
    }

    #[tokio::test]
    async fn bad_tag_blob_still_runs_other_checks() {
        let mut trace = ambient_trace();
        trace.span_id = SpanId::INVALID;
        let response = EchoResponse {
            trace_id: Bytes::from_static(&[0; 16]),
            trace_options: 0,
            tags_blob: Bytes::from_static(&[3]),
        };
        let result = verifier(response).perform_call(&trace, &ambient_tags()).await;
        assert!(!result.passed);
        assert_eq!(result.failures.len(), 4);
        assert_matches!(result.failures[0], Failure::TraceId { .. });
        assert_matches!(result.failures[1], Failure::ZeroSpanId);
        assert_matches!(result.failures[2], Failure::TraceOptions { .. });
        assert_matches!(result.failures[3], Failure::TagsFormat(TagContextError::UnsupportedVersion(3)));
    }

    #[tokio::test]
    async fn transport_error_fails_without_panicking() {
        let verifier = PropagationVerifier::new(Canned::new(Err(ServerError::InvalidArgument("boom".into()))));
        let result = verifier.perform_call(&ambient_trace(), &ambient_tags()).await;
        assert!(!result.passed);
        assert_matches!(&result.failures[..], [Failure::Transport(msg)] if msg.contains("boom"));
    }

    #[tokio::test]
    async fn passes_against_local_echo() {
        let verifier = PropagationVerifier::new(LocalTransport::new(CensusEcho::default()));
        let result = verifier.perform_call(&ambient_trace(), &ambient_tags()).await;
        assert_eq!(result, VerificationResult { passed: true, failures: vec![] });
    }

    /// The default format with its bytes reversed.
    struct Reversed;

    impl TagContextBinarySerializer for Reversed {
        fn to_bytes(&self, tags: &TagContext) -> Result<Bytes, TagContextError> {
            let mut bytes = BinaryFormat.to_bytes(tags)?.to_vec();
            bytes.reverse();
            Ok(bytes.into())
        }

        fn from_bytes(&self, bytes: &[u8]) -> Result<TagContext, TagContextError> {
            let mut bytes = bytes.to_vec();
            bytes.reverse();
            BinaryFormat.from_bytes(&bytes)
        }
    }

    fn reversed_echo() -> LocalTransport<CensusEcho> {
        LocalTransport::new(CensusEcho::new(Propagator::new(Reversed))).with_propagator(Propagator::new(Reversed))
    }

    #[tokio::test]
    async fn shared_custom_serializer_passes() {
        let verifier = PropagationVerifier::new(reversed_echo()).with_serializer(Reversed);
        let result = verifier.perform_call(&ambient_trace(), &ambient_tags()).await;
        assert_eq!(result, VerificationResult { passed: true, failures: vec![] });
    }

    #[tokio::test]
    async fn serializer_mismatch_is_a_format_failure() {
        let verifier = PropagationVerifier::new(reversed_echo());
        let result = verifier.perform_call(&ambient_trace(), &ambient_tags()).await;
        assert!(!result.passed);
        // The reversed blob starts with the last byte of "open-census".
        assert_eq!(result.failures, vec![Failure::TagsFormat(TagContextError::UnsupportedVersion(b's'))]);
    }

    #[test]
    fn expected_values_add_method_tag_only_to_expectation() {
        let ambient = ambient_tags();
        let expected = ExpectedValues::compute(&ambient_trace(), &ambient, &TagValue::new(METHOD).unwrap());
        assert_eq!(expected.trace_id.as_ref(), &trace_id());
        assert_eq!(expected.trace_options, 0x0100_0000);
        assert_eq!(expected.tags.len(), 3);
        assert_eq!(ambient.len(), 2);
    }
}
