// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Wire formats and primitives shared by the NTS key establishment and
//! NTS-for-NTP crates (RFC 8915).
//!
//! Nothing in this crate performs I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// AES-SIV-CMAC-256 and the AEAD seam used by cookies and packets.
pub mod aead;
/// Error types for record encoding and extension field handling.
pub mod error;
/// NTP extension field placement, parsing and NTS field types.
///
/// Provides types for parsing and serializing NTP extension fields (RFC 7822)
/// and NTS-specific extension field types (RFC 8915).
pub mod extension;
/// NTS-KE record codec and the capacity-bounded message buffer.
pub mod record;
