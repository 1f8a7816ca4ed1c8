// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Error types for NTS key establishment.
//!
//! Public async entry points return `io::Result<T>`. Internally, errors are
//! constructed as [`NtsKeError`] variants and converted to `io::Error`
//! automatically via `From<NtsKeError> for io::Error`.
//!
//! Users who want programmatic error matching can downcast via
//! `io::Error::get_ref()`:
//!
//! ```no_run
//! use nts_ke::error::NtsKeError;
//!
//! # fn example(result: std::io::Result<()>) {
//! if let Err(e) = result {
//!     if let Some(ke_err) = e
//!         .get_ref()
//!         .and_then(|inner| inner.downcast_ref::<NtsKeError>())
//!     {
//!         match ke_err {
//!             NtsKeError::Protocol(p) => eprintln!("NTS-KE protocol error: {p}"),
//!             NtsKeError::Cookie(c) => eprintln!("cookie rejected: {c}"),
//!             _ => eprintln!("NTS-KE error: {ke_err}"),
//!         }
//!     }
//! }
//! # }
//! ```

pub use nts_proto::error::{ParseError, RecordError};

use std::fmt;
use std::io;

/// Errors that can occur during NTS key establishment.
#[derive(Debug)]
pub enum NtsKeError {
    /// The peer violated the NTS-KE protocol.
    Protocol(ProtocolError),
    /// A cookie could not be decoded.
    Cookie(CookieError),
    /// Invalid configuration (bad TLS credentials or server name).
    Config(ConfigError),
    /// Underlying I/O error (socket bind, connect, TLS, key export).
    Io(io::Error),
}

/// NTS-KE protocol violations.
///
/// On the client these are all treated as a bad response; nothing is retried
/// at this layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProtocolError {
    /// The session closed before a complete response was received.
    IncompleteResponse,
    /// The server answered with an Error record.
    ErrorRecord {
        /// Error code carried by the record.
        code: u16,
    },
    /// The server answered with a Warning record.
    WarningRecord {
        /// Warning code carried by the record.
        code: u16,
    },
    /// The peer sent a critical record type this side does not implement.
    UnrecognizedCriticalRecord {
        /// The unrecognized record type.
        record_type: u16,
    },
    /// A record had a body of the wrong shape.
    InvalidRecord {
        /// The record type.
        record_type: u16,
        /// Length of the rejected body.
        length: usize,
    },
    /// The server did not select NTPv4 as the next protocol.
    UnexpectedNextProtocol,
    /// The server did not select AES-SIV-CMAC-256.
    UnexpectedAeadAlgorithm,
    /// The response carried no usable cookie.
    NoCookies,
    /// The message could not be encoded.
    Record(RecordError),
}

/// Reasons a cookie is rejected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CookieError {
    /// The cookie does not have the fixed encoded length.
    Length {
        /// Length of the rejected cookie.
        length: usize,
    },
    /// No resident server key carries this identifier.
    UnknownKey {
        /// Key identifier from the cookie.
        key_id: u32,
    },
    /// Authenticated decryption failed.
    Authentication,
}

/// Configuration errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// Invalid TLS certificate or private key.
    InvalidTlsCredentials {
        /// Detail about the failure.
        detail: String,
    },
    /// The server name cannot be used for certificate verification.
    InvalidServerName {
        /// The rejected name.
        name: String,
    },
    /// No listening socket could be bound.
    NoListeners {
        /// Port that was requested.
        port: u16,
    },
    /// The shared key ring lock was poisoned by a panicking holder.
    KeyRingPoisoned,
}

// ── Display implementations ─────────────────────────────────────────

impl fmt::Display for NtsKeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NtsKeError::Protocol(e) => write!(f, "NTS-KE protocol error: {e}"),
            NtsKeError::Cookie(e) => write!(f, "NTS cookie error: {e}"),
            NtsKeError::Config(e) => write!(f, "NTS-KE config error: {e}"),
            NtsKeError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::IncompleteResponse => {
                write!(f, "session closed without a complete response")
            }
            ProtocolError::ErrorRecord { code } => write!(f, "server sent error {code}"),
            ProtocolError::WarningRecord { code } => write!(f, "server sent warning {code}"),
            ProtocolError::UnrecognizedCriticalRecord { record_type } => {
                write!(f, "unrecognized critical NTS-KE record type: {record_type}")
            }
            ProtocolError::InvalidRecord {
                record_type,
                length,
            } => {
                write!(f, "invalid record type {record_type} with {length}-byte body")
            }
            ProtocolError::UnexpectedNextProtocol => {
                write!(f, "server did not negotiate NTPv4")
            }
            ProtocolError::UnexpectedAeadAlgorithm => {
                write!(f, "server did not negotiate AES-SIV-CMAC-256")
            }
            ProtocolError::NoCookies => write!(f, "response contained no cookies"),
            ProtocolError::Record(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for CookieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CookieError::Length { length } => write!(f, "invalid cookie length {length}"),
            CookieError::UnknownKey { key_id } => {
                write!(f, "unknown server key {key_id:08x}")
            }
            CookieError::Authentication => write!(f, "cookie failed authentication"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidTlsCredentials { detail } => {
                write!(f, "invalid TLS credentials: {detail}")
            }
            ConfigError::InvalidServerName { name } => {
                write!(f, "invalid server name '{name}'")
            }
            ConfigError::NoListeners { port } => {
                write!(f, "could not bind any NTS-KE listener on port {port}")
            }
            ConfigError::KeyRingPoisoned => write!(f, "server key ring lock poisoned"),
        }
    }
}

// ── Error trait implementations ─────────────────────────────────────

impl std::error::Error for NtsKeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NtsKeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ProtocolError {}
impl std::error::Error for CookieError {}
impl std::error::Error for ConfigError {}

// ── From conversions ────────────────────────────────────────────────

impl From<NtsKeError> for io::Error {
    fn from(err: NtsKeError) -> io::Error {
        let kind = match &err {
            NtsKeError::Protocol(_) => io::ErrorKind::InvalidData,
            NtsKeError::Cookie(_) => io::ErrorKind::InvalidData,
            NtsKeError::Config(ConfigError::KeyRingPoisoned) => io::ErrorKind::Other,
            NtsKeError::Config(_) => io::ErrorKind::InvalidInput,
            NtsKeError::Io(e) => e.kind(),
        };
        // Preserve the original io::Error directly for the Io variant.
        if let NtsKeError::Io(e) = err {
            return e;
        }
        io::Error::new(kind, err)
    }
}

impl From<io::Error> for NtsKeError {
    fn from(err: io::Error) -> NtsKeError {
        NtsKeError::Io(err)
    }
}

impl From<ProtocolError> for NtsKeError {
    fn from(err: ProtocolError) -> NtsKeError {
        NtsKeError::Protocol(err)
    }
}

impl From<CookieError> for NtsKeError {
    fn from(err: CookieError) -> NtsKeError {
        NtsKeError::Cookie(err)
    }
}

impl From<ConfigError> for NtsKeError {
    fn from(err: ConfigError) -> NtsKeError {
        NtsKeError::Config(err)
    }
}

impl From<RecordError> for NtsKeError {
    fn from(err: RecordError) -> NtsKeError {
        NtsKeError::Protocol(ProtocolError::Record(err))
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(
            ProtocolError::ErrorRecord { code: 1 }.to_string(),
            "server sent error 1"
        );
        assert_eq!(
            ProtocolError::UnrecognizedCriticalRecord { record_type: 99 }.to_string(),
            "unrecognized critical NTS-KE record type: 99"
        );
        assert_eq!(
            ProtocolError::InvalidRecord {
                record_type: 7,
                length: 3
            }
            .to_string(),
            "invalid record type 7 with 3-byte body"
        );
    }

    #[test]
    fn test_cookie_error_display() {
        assert_eq!(
            CookieError::UnknownKey { key_id: 0xdead_beef }.to_string(),
            "unknown server key deadbeef"
        );
        assert_eq!(
            CookieError::Length { length: 12 }.to_string(),
            "invalid cookie length 12"
        );
        assert_eq!(
            CookieError::Authentication.to_string(),
            "cookie failed authentication"
        );
    }

    #[test]
    fn test_config_error_display() {
        let e = ConfigError::InvalidTlsCredentials {
            detail: "bad PEM".to_string(),
        };
        assert_eq!(e.to_string(), "invalid TLS credentials: bad PEM");
        let e = ConfigError::InvalidServerName {
            name: "bad name".to_string(),
        };
        assert_eq!(e.to_string(), "invalid server name 'bad name'");
    }

    #[test]
    fn test_error_to_io_error_kind() {
        let cases: Vec<(NtsKeError, io::ErrorKind)> = vec![
            (
                NtsKeError::Protocol(ProtocolError::NoCookies),
                io::ErrorKind::InvalidData,
            ),
            (
                NtsKeError::Cookie(CookieError::Authentication),
                io::ErrorKind::InvalidData,
            ),
            (
                NtsKeError::Config(ConfigError::KeyRingPoisoned),
                io::ErrorKind::Other,
            ),
            (
                NtsKeError::Config(ConfigError::NoListeners { port: 4460 }),
                io::ErrorKind::InvalidInput,
            ),
        ];
        for (ke_err, expected_kind) in cases {
            let io_err: io::Error = ke_err.into();
            assert_eq!(io_err.kind(), expected_kind);
        }
    }

    #[test]
    fn test_downcast_roundtrip() {
        let io_err: io::Error = NtsKeError::Protocol(ProtocolError::UnexpectedNextProtocol).into();
        let inner = io_err
            .get_ref()
            .unwrap()
            .downcast_ref::<NtsKeError>()
            .unwrap();
        assert!(matches!(
            inner,
            NtsKeError::Protocol(ProtocolError::UnexpectedNextProtocol)
        ));
    }

    #[test]
    fn test_io_error_passthrough() {
        let orig = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let io_err: io::Error = NtsKeError::Io(orig).into();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(io_err.to_string(), "reset");
    }

    #[test]
    fn test_from_record_error() {
        let err: NtsKeError = RecordError::BodyTooLong { length: 70000 }.into();
        assert!(matches!(
            err,
            NtsKeError::Protocol(ProtocolError::Record(RecordError::BodyTooLong { .. }))
        ));
    }

    #[test]
    fn test_source() {
        let err = NtsKeError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "broken"));
        assert!(std::error::Error::source(&err).is_some());
        let err = NtsKeError::Cookie(CookieError::Authentication);
        assert!(std::error::Error::source(&err).is_none());
    }
}
