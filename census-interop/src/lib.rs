// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! census-interop checks that trace and tag contexts survive an RPC round trip.
//!
//! A [`PropagationVerifier`](client::PropagationVerifier) sends an `Echo` call
//! carrying the caller's [`TraceContext`](trace::TraceContext) and
//! [`TagContext`](tags::TagContext), and compares what the echo service
//! mirrors back against the values computed before the call.
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod config;
pub mod echo;
pub mod propagation;
pub mod server;
pub mod tags;
pub mod trace;
pub mod transport;
