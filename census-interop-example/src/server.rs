// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use census_interop::echo::CensusEcho;
use census_interop::server::{serve_tcp, TcpConfig};
use census_interop::transport::codec::Codec;
use clap::Parser;
use service::init_tracing;
use std::net::{IpAddr, Ipv6Addr};

#[derive(Parser)]
struct Flags {
    /// Sets the port number to listen on.
    #[clap(long)]
    port: u16,
    /// Sets the frame codec, `bincode` or `json`.
    #[clap(long, default_value_t = Codec::Bincode)]
    codec: Codec,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing("Census Interop Echo Server")?;

    let config = TcpConfig::new((IpAddr::V6(Ipv6Addr::LOCALHOST), flags.port)).with_transport_codec(flags.codec);
    serve_tcp(config, CensusEcho::default()).await?;

    Ok(())
}
