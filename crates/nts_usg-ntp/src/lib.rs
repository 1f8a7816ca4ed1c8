// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS extension-field authentication for NTPv4 packets (RFC 8915 Section 5).
//!
//! The server half checks requests against the key ring an `nts_ke` server
//! seals its cookies with and authenticates the responses. The client half
//! keeps the cookies from NTS-KE and protects requests with them.
//!
//! Both halves only add and check extension fields; building NTP headers,
//! sockets and clock filtering belong to the caller.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod server;

/// NTP version every NTS-protected packet must carry.
pub const NTP_VERSION: u8 = 4;

/// Length of the unique identifiers this crate generates, and the shortest it accepts.
pub const MIN_UNIQUE_ID_LENGTH: usize = 32;
