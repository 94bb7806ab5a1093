// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! The interop client: a verifier for one call and a runner over many targets.

pub mod runner;
pub mod verifier;

pub use runner::{interop_tags, RunnerConfig, TargetReport, TestRunner};
pub use verifier::{verify_response, ExpectedValues, Failure, PropagationVerifier, VerificationResult};
