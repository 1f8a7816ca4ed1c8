// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while authenticating NTP packets with NTS.
//!
//! [`NtsAuthError`] converts into [`std::io::Error`]; the original error is
//! recoverable through `get_ref()` and `downcast_ref`.

use std::fmt;
use std::io;

use nts_ke::error::{ConfigError, CookieError, NtsKeError, ParseError};
use nts_proto::aead::AeadError;

/// Reasons an NTS-protected packet is rejected or cannot be built.
#[derive(Debug)]
pub enum NtsAuthError {
    /// The packet or one of its extension fields is malformed.
    Parse(ParseError),
    /// A required extension field is absent.
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },
    /// The request carried more than one cookie.
    DuplicateCookie,
    /// The request cookie could not be opened.
    Cookie(CookieError),
    /// The authenticator tag did not verify.
    Authentication,
    /// Sealing the outgoing authenticator failed.
    Seal(AeadError),
    /// The client has no cookie left to send.
    NoCookies,
    /// The packet has the wrong association mode.
    UnexpectedMode {
        /// Mode found in the header.
        mode: u8,
    },
    /// The packet is not NTPv4.
    UnsupportedVersion {
        /// Version found in the header.
        version: u8,
    },
    /// The response does not echo the identifier of the outstanding request.
    UniqueIdMismatch,
    /// Key establishment failed while refilling cookies.
    Ke(NtsKeError),
}

impl fmt::Display for NtsAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NtsAuthError::Parse(e) => write!(f, "malformed NTS packet: {e}"),
            NtsAuthError::MissingField { field } => write!(f, "missing {field} extension field"),
            NtsAuthError::DuplicateCookie => f.write_str("request carries more than one cookie"),
            NtsAuthError::Cookie(e) => write!(f, "cookie rejected: {e}"),
            NtsAuthError::Authentication => f.write_str("NTS authenticator did not verify"),
            NtsAuthError::Seal(e) => write!(f, "could not seal NTS authenticator: {e}"),
            NtsAuthError::NoCookies => f.write_str("no NTS cookies remaining"),
            NtsAuthError::UnexpectedMode { mode } => write!(f, "unexpected NTP mode {mode}"),
            NtsAuthError::UnsupportedVersion { version } => {
                write!(f, "unsupported NTP version {version}")
            }
            NtsAuthError::UniqueIdMismatch => f.write_str("unique identifier mismatch"),
            NtsAuthError::Ke(e) => write!(f, "NTS-KE failed: {e}"),
        }
    }
}

impl std::error::Error for NtsAuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NtsAuthError::Parse(e) => Some(e),
            NtsAuthError::Cookie(e) => Some(e),
            NtsAuthError::Seal(e) => Some(e),
            NtsAuthError::Ke(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for NtsAuthError {
    fn from(err: ParseError) -> NtsAuthError {
        NtsAuthError::Parse(err)
    }
}

impl From<CookieError> for NtsAuthError {
    fn from(err: CookieError) -> NtsAuthError {
        NtsAuthError::Cookie(err)
    }
}

impl From<NtsKeError> for NtsAuthError {
    fn from(err: NtsKeError) -> NtsAuthError {
        NtsAuthError::Ke(err)
    }
}

impl From<ConfigError> for NtsAuthError {
    fn from(err: ConfigError) -> NtsAuthError {
        NtsAuthError::Ke(NtsKeError::Config(err))
    }
}

impl From<NtsAuthError> for io::Error {
    fn from(err: NtsAuthError) -> io::Error {
        match err {
            NtsAuthError::Ke(e) => e.into(),
            NtsAuthError::NoCookies => io::Error::new(io::ErrorKind::NotFound, err),
            NtsAuthError::Seal(_) => io::Error::other(err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
