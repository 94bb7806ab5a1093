// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! In-process transport.

use super::{EchoTransport, TransportError};
use crate::echo::{dispatch, EchoRequest, EchoResponse, EchoService, ServerContext};
use crate::propagation::{Metadata, Propagator};
use crate::tags::TagContext;
use crate::trace::TraceContext;

/// Calls an [`EchoService`] directly, passing context through [`Metadata`]
/// exactly as a remote call would.
#[derive(Clone, Debug)]
pub struct LocalTransport<S> {
    service: S,
    propagator: Propagator,
}

impl<S: EchoService> LocalTransport<S> {
    /// Creates a transport calling `service`.
    pub fn new(service: S) -> Self {
        Self { service, propagator: Propagator::default() }
    }

    /// Sets the propagator used to encode context.
    pub fn with_propagator(mut self, propagator: Propagator) -> Self {
        self.propagator = propagator;
        self
    }
}

impl<S: EchoService> EchoTransport for LocalTransport<S> {
    async fn echo(&self, method: &str, trace: &TraceContext, tags: &TagContext, request: EchoRequest) -> Result<EchoResponse, TransportError> {
        let mut metadata = Metadata::new();
        self.propagator.inject(trace, tags, &mut metadata)?;
        let ctx = ServerContext { method: method.to_owned(), metadata };
        Ok(dispatch(&self.service, ctx, request).await?)
    }
}
