// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Provides building blocks for tracing distributed programs.
//!
//! A trace is logically a tree of causally-related events called spans. The
//! [`TraceContext`] identifies the current trace, the current span and whether
//! it is sampled. In distributed systems, a context is sent from client to
//! server to connect events occurring on either side.
//!
//! This crate's design is based on [opencensus
//! tracing](https://opencensus.io/core-concepts/tracing/).

use opentelemetry::trace::{Span as _, SpanContext, Tracer as _, TracerProvider as _};
use opentelemetry_sdk::trace::{Config, RandomIdGenerator, Sampler, TracerProvider};
use std::borrow::Cow;
use std::fmt;

pub use opentelemetry::trace::{SpanId, TraceFlags, TraceId};

/// Name of the span the interop client opens around each call.
pub const CLIENT_SPAN_NAME: &str = "gRPC-client-span";

/// Identifiers of the active span plus its sampling flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TraceContext {
    /// An identifier for a trace, shared by all spans in it.
    pub trace_id: TraceId,
    /// An identifier of the current span.
    pub span_id: SpanId,
    /// Bit 0 is the sampling decision.
    pub trace_flags: TraceFlags,
}

impl TraceContext {
    /// Creates a trace context from its parts.
    pub fn new(trace_id: TraceId, span_id: SpanId, trace_flags: TraceFlags) -> Self {
        Self { trace_id, span_id, trace_flags }
    }

    /// Returns true if the span is sampled.
    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    /// Returns true if the span id is non-zero, which every recording span must have.
    pub fn has_valid_span(&self) -> bool {
        self.span_id != SpanId::INVALID
    }

    /// The flags as carried in the `trace_options` field of an echo response.
    pub fn trace_options(&self) -> i32 {
        encode_trace_options(self.trace_flags)
    }
}

impl From<&SpanContext> for TraceContext {
    fn from(cx: &SpanContext) -> Self {
        Self {
            trace_id: cx.trace_id(),
            span_id: cx.span_id(),
            trace_flags: cx.trace_flags(),
        }
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}:{:016x}:{:02x}", self.trace_id, self.span_id, self.trace_flags.to_u8())
    }
}

/// Encodes the one-byte flags into the `i32` trace options field.
///
/// The flags byte occupies the most significant byte of the big-endian
/// integer, so `0x01` encodes as `0x0100_0000`. Both peers must agree on
/// this layout for the comparison to hold.
pub fn encode_trace_options(flags: TraceFlags) -> i32 {
    i32::from_be_bytes([flags.to_u8(), 0, 0, 0])
}

/// Starts spans on behalf of the interop client.
///
/// The tracer is passed to whoever needs it; nothing is looked up globally.
pub struct Tracer {
    provider: TracerProvider,
    tracer: opentelemetry_sdk::trace::Tracer,
}

impl Tracer {
    /// Returns a tracer whose spans are always sampled.
    pub fn always_sample() -> Self {
        let config = Config::default().with_sampler(Sampler::AlwaysOn).with_id_generator(RandomIdGenerator::default());
        Self::with_provider(TracerProvider::builder().with_config(config).build())
    }

    /// Returns a tracer backed by the given provider.
    pub fn with_provider(provider: TracerProvider) -> Self {
        let tracer = provider.tracer("census-interop");
        Self { provider, tracer }
    }

    /// The provider spans are recorded with.
    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Starts a root span. The span ends when the returned scope is dropped.
    pub fn start_span(&self, name: impl Into<Cow<'static, str>>) -> SpanScope {
        let span = self.tracer.start(name);
        let context = TraceContext::from(span.span_context());
        SpanScope { span, context }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

/// A started span.
///
/// Dropping the scope ends the span explicitly, so the span lives exactly as
/// long as the scope that owns it.
pub struct SpanScope {
    span: opentelemetry_sdk::trace::Span,
    context: TraceContext,
}

impl SpanScope {
    /// The trace context of the span.
    pub fn context(&self) -> TraceContext {
        self.context
    }
}

impl fmt::Debug for SpanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanScope").field("context", &self.context).finish_non_exhaustive()
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        self.span.end();
    }
}
