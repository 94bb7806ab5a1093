// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! TCP echo server.

use crate::echo::{dispatch, EchoService, ServerContext};
use crate::transport::codec::{Bincode, Codec, Json};
use crate::transport::{RequestFrame, ResponseFrame, DEFAULT_MAX_FRAME_LEN};
use futures::prelude::*;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tarpc::tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

/// TCP server config.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TcpConfig<A: ToSocketAddrs> {
    /// listen address.
    pub(crate) listen_address: A,
    /// transport codec type.
    pub(crate) transport_codec: Codec,
    /// Maximum frame length, default is 4 MiB.
    pub(crate) max_frame_len: usize,
    /// Maximum number of connections served at once.
    /// Default is 10, and zero means 10.
    pub(crate) buffer_unordered: usize,
}

impl<A: ToSocketAddrs> TcpConfig<A> {
    /// Create a new TCP config.
    pub fn new(listen_address: A) -> Self {
        Self {
            listen_address,
            transport_codec: Default::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            buffer_unordered: 10,
        }
    }
    /// listen address.
    pub fn listen_address(&self) -> &A {
        &self.listen_address
    }
    /// Set transport codec type.
    pub fn with_transport_codec(mut self, transport_codec: Codec) -> Self {
        self.transport_codec = transport_codec;
        self
    }
    /// transport codec type.
    pub fn transport_codec(&self) -> Codec {
        self.transport_codec
    }
    /// Set maximum frame length, zero means the default.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = if max_frame_len == 0 { DEFAULT_MAX_FRAME_LEN } else { max_frame_len };
        self
    }
    /// Maximum frame length.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
    /// Set the maximum number of connections served at once.
    /// Default is 10, and zero means 10.
    pub fn with_buffer_unordered(mut self, buffer_unordered: usize) -> Self {
        self.buffer_unordered = if buffer_unordered == 0 { 10 } else { buffer_unordered };
        self
    }
    /// Maximum number of connections served at once.
    pub fn buffer_unordered(&self) -> usize {
        self.buffer_unordered
    }
}

/// A bound echo server.
pub struct EchoServer<S> {
    listener: TcpListener,
    codec: Codec,
    max_frame_len: usize,
    buffer_unordered: usize,
    service: Arc<S>,
}

impl<S: EchoService + 'static> EchoServer<S> {
    /// Binds the listen address of `config`.
    pub async fn bind<A: ToSocketAddrs>(config: TcpConfig<A>, service: S) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.listen_address).await?;
        Ok(Self {
            listener,
            codec: config.transport_codec,
            max_frame_len: config.max_frame_len,
            buffer_unordered: config.buffer_unordered,
            service: Arc::new(service),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and serves connections until the task is dropped.
    pub async fn run(self) {
        let Self { listener, codec, max_frame_len, buffer_unordered, service } = self;
        if let Ok(addr) = listener.local_addr() {
            info!("[ECHO] Listening on {addr} with {codec} codec");
        }
        stream::poll_fn(|cx| listener.poll_accept(cx).map(Some))
            // Ignore accept errors.
            .filter_map(|r| future::ready(r.ok()))
            .map(|(stream, peer)| tokio::spawn(serve_connection(stream, peer, codec, max_frame_len, service.clone())))
            .buffer_unordered(buffer_unordered)
            .for_each(|joined| async move {
                if let Err(e) = joined {
                    warn!("[ECHO] connection task failed: {e}");
                }
            })
            .await;
    }
}

/// Binds and serves `service` until the task is dropped.
pub async fn serve_tcp<A: ToSocketAddrs, S: EchoService + 'static>(config: TcpConfig<A>, service: S) -> io::Result<()> {
    EchoServer::bind(config, service).await?.run().await;
    Ok(())
}

async fn serve_connection<S: EchoService>(stream: TcpStream, peer: SocketAddr, codec: Codec, max_frame_len: usize, service: Arc<S>) {
    debug!("[ECHO] accepted connection from {peer}");
    let framed = Framed::new(stream, LengthDelimitedCodec::builder().max_frame_length(max_frame_len).new_codec());
    match codec {
        Codec::Bincode => {
            // Bincode codec using [bincode](https://docs.rs/bincode) crate.
            let transport = tarpc::serde_transport::new(framed, Bincode::<RequestFrame, ResponseFrame>::default());
            serve_frames(transport, peer, &*service).await
        },
        Codec::Json => {
            // JSON codec using [serde_json](https://docs.rs/serde_json) crate.
            let transport = tarpc::serde_transport::new(framed, Json::<RequestFrame, ResponseFrame>::default());
            serve_frames(transport, peer, &*service).await
        },
    }
}

async fn serve_frames<T, S>(transport: T, peer: SocketAddr, service: &S)
where
    T: Stream<Item = io::Result<RequestFrame>> + Sink<ResponseFrame, Error = io::Error>,
    S: EchoService,
{
    futures::pin_mut!(transport);
    while let Some(frame) = transport.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[ECHO] dropping connection from {peer}: {e}");
                return;
            },
        };
        let ctx = ServerContext { method: frame.method, metadata: frame.metadata };
        let response = dispatch(service, ctx, frame.message).await;
        if let Err(e) = &response {
            warn!("[ECHO] call from {peer} failed: {e}");
        }
        if let Err(e) = transport.send(response).await {
            warn!("[ECHO] could not respond to {peer}: {e}");
            return;
        }
    }
    debug!("[ECHO] connection from {peer} closed");
}
