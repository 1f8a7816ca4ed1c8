// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Error types for NTS-KE record encoding and NTP extension field handling.
//!
//! Both types implement [`std::error::Error`] and convert into
//! [`std::io::Error`], so callers working at the `io::Result` boundary can
//! recover them with `io::Error::get_ref()` and a downcast.

use std::fmt;
use std::io;

/// Errors raised while appending records to an NTS-KE message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordError {
    /// The record body does not fit in the 16-bit length field.
    BodyTooLong {
        /// Length of the rejected body.
        length: usize,
    },
    /// The message would grow past its fixed capacity.
    MessageFull {
        /// Total message length the operation required.
        needed: usize,
        /// Capacity of the message buffer.
        available: usize,
    },
}

/// Errors that can occur while placing or reading NTP extension fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The buffer is too short for the expected data.
    BufferTooShort {
        /// Number of bytes needed.
        needed: usize,
        /// Number of bytes available.
        available: usize,
    },
    /// The packet length is not a multiple of four bytes.
    UnalignedPacket {
        /// Length of the packet.
        length: usize,
    },
    /// Extension field has an invalid declared length.
    InvalidExtensionLength {
        /// The declared length that was invalid.
        declared: u16,
    },
    /// Extension field data extends beyond the buffer.
    ExtensionOverflow,
    /// The packet would grow past the largest packet this implementation sends.
    PacketTooLong {
        /// Length the packet would have reached.
        length: usize,
    },
    /// An invalid or unrecognized field value was encountered.
    InvalidField {
        /// Name of the field that was invalid.
        field: &'static str,
        /// The invalid value.
        value: u32,
    },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::BodyTooLong { length } => {
                write!(f, "record body too long: {} bytes", length)
            }
            RecordError::MessageFull { needed, available } => {
                write!(
                    f,
                    "NTS-KE message too long: needed {} bytes, capacity {}",
                    needed, available
                )
            }
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::BufferTooShort { needed, available } => {
                write!(
                    f,
                    "buffer too short: needed {} bytes, got {}",
                    needed, available
                )
            }
            ParseError::UnalignedPacket { length } => {
                write!(f, "packet length {} is not a multiple of 4", length)
            }
            ParseError::InvalidExtensionLength { declared } => {
                write!(f, "invalid extension field length: {}", declared)
            }
            ParseError::ExtensionOverflow => {
                write!(f, "extension field value extends beyond packet")
            }
            ParseError::PacketTooLong { length } => {
                write!(f, "packet too long: {} bytes", length)
            }
            ParseError::InvalidField { field, value } => {
                write!(f, "invalid {} value: {}", field, value)
            }
        }
    }
}

impl std::error::Error for RecordError {}
impl std::error::Error for ParseError {}

impl From<RecordError> for io::Error {
    fn from(err: RecordError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

impl From<ParseError> for io::Error {
    fn from(err: ParseError) -> io::Error {
        let kind = match &err {
            ParseError::BufferTooShort { .. } => io::ErrorKind::UnexpectedEof,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_body_too_long() {
        let err = RecordError::BodyTooLong { length: 70000 };
        assert_eq!(err.to_string(), "record body too long: 70000 bytes");
    }

    #[test]
    fn test_display_message_full() {
        let err = RecordError::MessageFull {
            needed: 16388,
            available: 16384,
        };
        assert_eq!(
            err.to_string(),
            "NTS-KE message too long: needed 16388 bytes, capacity 16384"
        );
    }

    #[test]
    fn test_display_buffer_too_short() {
        let err = ParseError::BufferTooShort {
            needed: 48,
            available: 10,
        };
        assert_eq!(err.to_string(), "buffer too short: needed 48 bytes, got 10");
    }

    #[test]
    fn test_display_invalid_extension_length() {
        let err = ParseError::InvalidExtensionLength { declared: 6 };
        assert_eq!(err.to_string(), "invalid extension field length: 6");
    }

    #[test]
    fn test_display_unaligned() {
        let err = ParseError::UnalignedPacket { length: 50 };
        assert_eq!(err.to_string(), "packet length 50 is not a multiple of 4");
    }

    #[test]
    fn test_parse_error_into_io_error() {
        let io_err: io::Error = ParseError::BufferTooShort {
            needed: 48,
            available: 0,
        }
        .into();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);

        let io_err: io::Error = ParseError::ExtensionOverflow.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_record_error_downcast() {
        let io_err: io::Error = RecordError::BodyTooLong { length: 65536 }.into();
        let inner = io_err
            .get_ref()
            .unwrap()
            .downcast_ref::<RecordError>()
            .unwrap();
        assert_eq!(inner, &RecordError::BodyTooLong { length: 65536 });
    }
}
