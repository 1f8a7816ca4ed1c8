// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS Key Establishment (RFC 8915 Section 4) for servers and clients.
//!
//! Sessions are non-blocking state machines driven by readiness events; the
//! server runs all of them from one Tokio task. The crate also owns the
//! server key ring that seals cookies, which the NTP request handler in
//! `nts_ntp` shares.
//!
//! # Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `pq-nts` | no | Enable post-quantum key exchange for NTS-KE (ML-KEM via aws-lc-rs). |

#![deny(unsafe_code)]
#![warn(missing_docs)]

// Re-export the wire formats for convenience.
pub use nts_proto::{aead, extension, record};

/// TLS capability sessions are driven through, and its rustls implementation.
pub mod channel;

/// NTS-KE client connector using the Tokio runtime.
pub mod client;

/// NTS-KE server configuration.
pub mod config;

/// Server key ring and cookie codec.
pub mod cookie;

/// Error types for NTS key establishment.
pub mod error;

/// Request and response negotiation.
pub mod exchange;

/// NTS-KE server using the Tokio runtime.
pub mod server;

/// Server and client session state machines.
pub mod session;

/// TLS configuration for NTS-KE (crypto provider selection).
pub mod tls_config;
