// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Runs the verifier once against every configured target.

use super::verifier::PropagationVerifier;
use crate::config::{default_targets, ConfigSource, Env, Target};
use crate::tags::{TagContext, TagKey, TagValue, OPERATION_KEY, PROJECT_KEY};
use crate::trace::{Tracer, CLIENT_SPAN_NAME};
use crate::transport::codec::Codec;
use crate::transport::{TcpTransport, DEFAULT_MAX_FRAME_LEN};
use faststr::FastStr;
use tracing::{info, Instrument};

/// The tags every interop call is made under.
pub fn interop_tags() -> TagContext {
    TagContext::builder()
        .put(TagKey::from_static(OPERATION_KEY), TagValue::from_static("interop-test"))
        .put(TagKey::from_static(PROJECT_KEY), TagValue::from_static("open-census"))
        .build()
}

/// Outcome for one target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetReport {
    /// Target name.
    pub name: FastStr,
    /// Port that was dialed.
    pub port: u16,
    /// Whether verification passed.
    pub passed: bool,
}

/// Runner settings.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct RunnerConfig {
    /// Host every target listens on.
    pub host: String,
    /// Codec used to talk to the targets.
    pub codec: Codec,
    /// Maximum frame length.
    pub max_frame_len: usize,
    /// Targets to verify, in order.
    pub targets: Vec<Target>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            codec: Codec::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            targets: default_targets(),
        }
    }
}

impl RunnerConfig {
    /// Set the host every target listens on.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
    /// Set transport serde codec
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
    /// Set maximum frame length.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
    /// Replace the targets.
    pub fn with_targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }
}

/// Verifies each target in turn. A failing target never stops the next one.
pub struct TestRunner<C = Env> {
    config: RunnerConfig,
    source: C,
    tracer: Tracer,
    tags: TagContext,
}

impl TestRunner<Env> {
    /// Creates a runner reading port overrides from the environment.
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_source(config, Env)
    }
}

impl<C: ConfigSource> TestRunner<C> {
    /// Creates a runner reading port overrides from `source`.
    pub fn with_source(config: RunnerConfig, source: C) -> Self {
        Self {
            config,
            source,
            tracer: Tracer::always_sample(),
            tags: interop_tags(),
        }
    }

    /// Replaces the tracer spans are started with.
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Runs every target and returns one report per target.
    pub async fn run(&self) -> Vec<TargetReport> {
        let mut reports = Vec::with_capacity(self.config.targets.len());
        for target in &self.config.targets {
            reports.push(self.run_target(target).await);
        }
        reports
    }

    /// Runs one target.
    pub async fn run_target(&self, target: &Target) -> TargetReport {
        let port = target.port(&self.source);
        let address = format!("{}:{port}", self.config.host);
        let transport = TcpTransport::new(address.clone())
            .with_codec(self.config.codec)
            .with_max_frame_len(self.config.max_frame_len);
        let verifier = PropagationVerifier::new(transport);

        let span = tracing::info_span!("interop", interop_target = %target.name, %address);
        async {
            info!("verifying propagation");
            let scope = self.tracer.start_span(CLIENT_SPAN_NAME);
            let result = verifier.perform_call(&scope.context(), &self.tags).await;
            TargetReport {
                name: target.name.clone(),
                port,
                passed: result.passed,
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interop_tags_are_fixed() {
        let tags = interop_tags();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get(OPERATION_KEY).map(TagValue::as_str), Some("interop-test"));
        assert_eq!(tags.get(PROJECT_KEY).map(TagValue::as_str), Some("open-census"));
    }

    #[test]
    fn config_builders() {
        let config = RunnerConfig::default().with_host("127.0.0.1").with_codec(Codec::Json).with_targets(vec![Target::new("T", 1)]);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.codec, Codec::Json);
        assert_eq!(config.targets, vec![Target::new("T", 1)]);
    }
}
