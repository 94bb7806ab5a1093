// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Interop targets and where their ports come from.

use faststr::FastStr;
use std::collections::HashMap;
use tracing::warn;

/// Known echo servers, by name, with their default ports.
///
/// The name doubles as the configuration key overriding the port.
pub const DEFAULT_TARGETS: &[(&str, u16)] = &[
    ("OPENCENSUS_JAVA_GRPC_INTEROP_TEST_PORT", 9001),
    ("OPENCENSUS_GO_GRPC_INTEROP_TEST_PORT", 9002),
    ("OPENCENSUS_PYTHON_GRPC_INTEROP_TEST_PORT", 9003),
];

/// A string-keyed configuration lookup.
pub trait ConfigSource {
    /// Returns the value set for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct Env;

impl ConfigSource for Env {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl<C: ConfigSource + ?Sized> ConfigSource for &C {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

/// Returns the port configured for `key`, or `default` when unset or unparsable.
pub fn port_or_default(source: &impl ConfigSource, key: &str, default: u16) -> u16 {
    let Some(raw) = source.get(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(port) => port,
        Err(e) => {
            warn!("ignoring {key}={raw:?}: {e}; using port {default}");
            default
        },
    }
}

/// One echo server to verify against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// Name of the target, also its port configuration key.
    pub name: FastStr,
    /// Port used when no override is configured.
    pub default_port: u16,
}

impl Target {
    /// Creates a target.
    pub fn new(name: impl Into<FastStr>, default_port: u16) -> Self {
        Self { name: name.into(), default_port }
    }

    /// Resolves the effective port against `source`.
    pub fn port(&self, source: &impl ConfigSource) -> u16 {
        port_or_default(source, &self.name, self.default_port)
    }
}

/// The built-in target table.
pub fn default_targets() -> Vec<Target> {
    DEFAULT_TARGETS.iter().map(|&(name, port)| Target::new(name, port)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn falls_back_when_unset() {
        assert_eq!(port_or_default(&source(&[]), "X_PORT", 9001), 9001);
    }

    #[test]
    fn override_wins() {
        assert_eq!(port_or_default(&source(&[("X_PORT", " 12345 ")]), "X_PORT", 9001), 12345);
    }

    #[test]
    fn falls_back_when_unparsable() {
        assert_eq!(port_or_default(&source(&[("X_PORT", "not-a-port")]), "X_PORT", 9001), 9001);
        assert_eq!(port_or_default(&source(&[("X_PORT", "70000")]), "X_PORT", 9001), 9001);
    }

    #[test]
    fn target_resolves_its_own_key() {
        let target = Target::new("OPENCENSUS_GO_GRPC_INTEROP_TEST_PORT", 9002);
        let src = source(&[("OPENCENSUS_JAVA_GRPC_INTEROP_TEST_PORT", "1")]);
        assert_eq!(target.port(&src), 9002);
        let src = source(&[("OPENCENSUS_GO_GRPC_INTEROP_TEST_PORT", "2")]);
        assert_eq!(target.port(&src), 2);
    }

    #[test]
    fn default_table_is_complete() {
        let targets = default_targets();
        assert_eq!(targets.len(), DEFAULT_TARGETS.len());
        assert!(targets.iter().all(|t| t.default_port > 0));
    }
}
