// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use census_interop::client::{RunnerConfig, TestRunner};
use census_interop::config::default_targets;
use census_interop::transport::codec::Codec;
use clap::Parser;
use service::init_tracing;

#[derive(Parser)]
struct Flags {
    /// Sets the host the echo servers listen on.
    #[clap(long, default_value = "localhost")]
    host: String,
    /// Sets the frame codec, `bincode` or `json`.
    #[clap(long, default_value_t = Codec::Bincode)]
    codec: Codec,
    /// Only verifies the named targets.
    #[clap(long)]
    only: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing("Census Interop Client")?;

    let targets = default_targets()
        .into_iter()
        .filter(|t| flags.only.is_empty() || flags.only.iter().any(|name| name.as_str() == t.name.as_str()))
        .collect();
    let config = RunnerConfig::default().with_host(flags.host).with_codec(flags.codec).with_targets(targets);
    let reports = TestRunner::new(config).run().await;

    let failed: Vec<_> = reports.iter().filter(|r| !r.passed).map(|r| format!("{}:{}", r.name, r.port)).collect();
    if !failed.is_empty() {
        anyhow::bail!("{} of {} targets failed: {}", failed.len(), reports.len(), failed.join(", "));
    }
    Ok(())
}
