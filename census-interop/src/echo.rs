// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! The `Echo` RPC: its messages, the service trait and a reference
//! implementation that mirrors propagated context back to the caller.

use crate::propagation::{Metadata, Propagator};
use crate::tags::{TagContext, TagKey, TagValue, METHOD_KEY};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Full name of the echo method.
pub const ECHO_METHOD: &str = "/echo.EchoService/Echo";

/// The echo request. It has no fields; everything travels as metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoRequest {}

/// The echo response, mirroring what the server received.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    /// The 16 raw bytes of the received trace id.
    pub trace_id: Bytes,
    /// The received trace flags, see [`crate::trace::encode_trace_options`].
    pub trace_options: i32,
    /// The received tag context in binary form, with the `method` tag added.
    pub tags_blob: Bytes,
}

/// Errors an echo server sends back instead of a response.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerError {
    /// The requested method does not exist.
    #[error("unimplemented method: {0}")]
    Unimplemented(String),
    /// The request could not be processed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// What the server knows about an inbound call besides its message.
#[derive(Clone, Debug)]
pub struct ServerContext {
    /// Full name of the invoked method.
    pub method: String,
    /// Metadata sent by the client.
    pub metadata: Metadata,
}

/// The echo service.
pub trait EchoService: Send + Sync {
    /// Handles one echo call.
    fn echo(&self, ctx: &ServerContext, request: EchoRequest) -> impl Future<Output = Result<EchoResponse, ServerError>> + Send;
}

impl<S: EchoService> EchoService for Arc<S> {
    fn echo(&self, ctx: &ServerContext, request: EchoRequest) -> impl Future<Output = Result<EchoResponse, ServerError>> + Send {
        (**self).echo(ctx, request)
    }
}

/// Reference echo service.
///
/// Mirrors the received trace id and flags, and the received tag context
/// plus a `method` tag naming the invoked method. A tag blob that does not
/// decode is echoed unchanged.
#[derive(Clone, Debug, Default)]
pub struct CensusEcho {
    propagator: Propagator,
}

impl CensusEcho {
    /// Creates an echo service decoding context with `propagator`.
    pub fn new(propagator: Propagator) -> Self {
        Self { propagator }
    }

    fn mirror(&self, ctx: &ServerContext) -> Result<EchoResponse, ServerError> {
        let extracted = self.propagator.extract(&ctx.metadata);
        let mut response = EchoResponse::default();
        match extracted.trace {
            Some(Ok(trace)) => {
                response.trace_id = Bytes::copy_from_slice(&trace.trace_id.to_bytes());
                response.trace_options = trace.trace_options();
            },
            Some(Err(e)) => warn!("[ECHO] dropping undecodable trace context: {e}"),
            None => debug!("[ECHO] call carries no trace context"),
        }
        let tags = match extracted.tags {
            Some(Ok(tags)) => tags,
            Some(Err(e)) => {
                warn!("[ECHO] echoing undecodable tag context as is: {e}");
                response.tags_blob = ctx.metadata.get(crate::propagation::TAGS_KEY).cloned().unwrap_or_default();
                return Ok(response);
            },
            None => TagContext::empty(),
        };
        let method = TagValue::new(ctx.method.clone()).map_err(|e| ServerError::InvalidArgument(e.to_string()))?;
        let tags = tags.to_builder().put(TagKey::from_static(METHOD_KEY), method).build();
        response.tags_blob = self.propagator.serializer().to_bytes(&tags).map_err(|e| ServerError::InvalidArgument(e.to_string()))?;
        Ok(response)
    }
}

impl EchoService for CensusEcho {
    async fn echo(&self, ctx: &ServerContext, _: EchoRequest) -> Result<EchoResponse, ServerError> {
        self.mirror(ctx)
    }
}

/// Routes a call by method name.
pub(crate) async fn dispatch<S: EchoService>(service: &S, ctx: ServerContext, request: EchoRequest) -> Result<EchoResponse, ServerError> {
    if ctx.method != ECHO_METHOD {
        return Err(ServerError::Unimplemented(ctx.method));
    }
    service.echo(&ctx, request).await
}
