// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Transports that carry an echo call, together with its propagated context,
//! to an [`EchoService`](crate::echo::EchoService).

use crate::echo::{EchoRequest, EchoResponse, ServerError};
use crate::propagation::Metadata;
use crate::tags::{TagContext, TagContextError};
use crate::trace::TraceContext;
use serde::{Deserialize, Serialize};
use std::future::Future;

pub mod codec;
mod local;
mod tcp;

pub use local::LocalTransport;
pub use tcp::TcpTransport;

/// Default maximum length of one frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// A request as it travels over the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Full method name.
    pub method: String,
    /// Propagated context.
    pub metadata: Metadata,
    /// The request message.
    pub message: EchoRequest,
}

/// A response as it travels over the wire.
pub type ResponseFrame = Result<EchoResponse, ServerError>;

/// Errors sending a call or receiving its response.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        /// Address dialed.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Reading or writing a frame failed.
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// The peer closed the connection before responding.
    #[error("connection closed before a response arrived")]
    Closed,
    /// The server answered with an error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),
    /// The tag context could not be attached to the call.
    #[error("could not propagate tag context: {0}")]
    Propagation(#[from] TagContextError),
}

/// Sends echo calls, attaching the caller's trace and tag contexts through
/// the transport's own propagation channel.
pub trait EchoTransport: Send + Sync {
    /// Invokes `method` with `request` and waits for the response.
    fn echo(&self, method: &str, trace: &TraceContext, tags: &TagContext, request: EchoRequest) -> impl Future<Output = Result<EchoResponse, TransportError>> + Send;
}

impl<T: EchoTransport> EchoTransport for &T {
    fn echo(&self, method: &str, trace: &TraceContext, tags: &TagContext, request: EchoRequest) -> impl Future<Output = Result<EchoResponse, TransportError>> + Send {
        (**self).echo(method, trace, tags, request)
    }
}
