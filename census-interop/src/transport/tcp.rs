// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! TCP transport: length-delimited frames with a serde codec body.

use super::codec::{Bincode, Codec, Json};
use super::{EchoTransport, RequestFrame, ResponseFrame, TransportError, DEFAULT_MAX_FRAME_LEN};
use crate::echo::{EchoRequest, EchoResponse};
use crate::propagation::{Metadata, Propagator};
use crate::tags::TagContext;
use crate::trace::TraceContext;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::io;
use tarpc::serde_transport::tcp;
use tracing::debug;

/// Opens one connection per call and exchanges a single request/response.
///
/// The connection is dropped when the call completes, whatever the outcome.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    address: String,
    codec: Codec,
    max_frame_len: usize,
    propagator: Propagator,
}

impl TcpTransport {
    /// Creates a transport dialing `address` (`host:port`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            codec: Codec::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            propagator: Propagator::default(),
        }
    }
    /// Set transport serde codec
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
    /// Set maximum frame length, zero means the default.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = if max_frame_len == 0 { DEFAULT_MAX_FRAME_LEN } else { max_frame_len };
        self
    }
    /// Sets the propagator used to encode context.
    pub fn with_propagator(mut self, propagator: Propagator) -> Self {
        self.propagator = propagator;
        self
    }
    /// The dialed address.
    pub fn address(&self) -> &str {
        &self.address
    }
    /// transport codec type.
    pub fn codec(&self) -> Codec {
        self.codec
    }
}

impl EchoTransport for TcpTransport {
    async fn echo(&self, method: &str, trace: &TraceContext, tags: &TagContext, request: EchoRequest) -> Result<EchoResponse, TransportError> {
        let mut metadata = Metadata::new();
        self.propagator.inject(trace, tags, &mut metadata)?;
        let frame = RequestFrame {
            method: method.to_owned(),
            metadata,
            message: request,
        };
        let connect_err = |source| TransportError::Connect { addr: self.address.clone(), source };
        debug!("[TRANSPORT] calling {method} on {} with {} codec", self.address, self.codec);
        match self.codec {
            Codec::Bincode => {
                // Bincode codec using [bincode](https://docs.rs/bincode) crate.
                let mut conn = tcp::connect(self.address.as_str(), Bincode::<ResponseFrame, RequestFrame>::default);
                conn.config_mut().max_frame_length(self.max_frame_len);
                exchange(conn.await.map_err(connect_err)?, frame).await
            },
            Codec::Json => {
                // JSON codec using [serde_json](https://docs.rs/serde_json) crate.
                let mut conn = tcp::connect(self.address.as_str(), Json::<ResponseFrame, RequestFrame>::default);
                conn.config_mut().max_frame_length(self.max_frame_len);
                exchange(conn.await.map_err(connect_err)?, frame).await
            },
        }
    }
}

async fn exchange<T>(transport: T, frame: RequestFrame) -> Result<EchoResponse, TransportError>
where
    T: Stream<Item = io::Result<ResponseFrame>> + Sink<RequestFrame, Error = io::Error>,
{
    futures::pin_mut!(transport);
    transport.send(frame).await?;
    match transport.next().await {
        Some(response) => Ok(response??),
        None => Err(TransportError::Closed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::trace::{SpanId, TraceFlags, TraceId};

    #[test]
    fn builders_set_address_and_codec() {
        let transport = TcpTransport::new("localhost:9001").with_codec(Codec::Json).with_max_frame_len(0);
        assert_eq!(transport.address(), "localhost:9001");
        assert_eq!(transport.codec(), Codec::Json);
        assert_eq!(transport.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[tokio::test]
    async fn refused_connection_names_the_address() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = TcpTransport::new(address.clone());
        let trace = TraceContext::new(TraceId::from_bytes([1; 16]), SpanId::from_bytes([2; 8]), TraceFlags::SAMPLED);
        let err = transport.echo(crate::echo::ECHO_METHOD, &trace, &TagContext::empty(), EchoRequest::default()).await.unwrap_err();
        assert_matches!(err, TransportError::Connect { addr, .. } if addr == transport.address());
    }
}
