// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE record codec (RFC 8915 Section 4).
//!
//! An NTS-KE message is a sequence of records carried over TLS, terminated
//! by a critical End of Message record with an empty body:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |C|         Record Type         |          Body Length          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! .                                                               .
//! .                           Record Body                         .
//! .                                                               .
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! [`Message`] is the single buffer a session uses for both directions. It
//! keeps the capacity limit in one place and tracks how much has been parsed,
//! how much has been flushed to the peer, and whether the peer has closed.

use std::io;

use crate::error::RecordError;

/// End of Message record type.
pub const RECORD_END_OF_MESSAGE: u16 = 0;
/// NTS Next Protocol Negotiation record type.
pub const RECORD_NEXT_PROTOCOL: u16 = 1;
/// Error record type.
pub const RECORD_ERROR: u16 = 2;
/// Warning record type.
pub const RECORD_WARNING: u16 = 3;
/// AEAD Algorithm Negotiation record type.
pub const RECORD_AEAD_ALGORITHM: u16 = 4;
/// New Cookie for NTPv4 record type.
pub const RECORD_COOKIE: u16 = 5;
/// NTPv4 Server Negotiation record type.
pub const RECORD_NTPV4_SERVER: u16 = 6;
/// NTPv4 Port Negotiation record type.
pub const RECORD_NTPV4_PORT: u16 = 7;

/// High bit of the type field marking a record the receiver must understand.
pub const CRITICAL_BIT: u16 = 0x8000;

/// Size of a record header (type + body length).
pub const RECORD_HEADER_LENGTH: usize = 4;

/// Largest record body the 16-bit length field can describe.
pub const MAX_BODY_LENGTH: usize = u16::MAX as usize;

/// Upper bound on a buffered NTS-KE message.
pub const MAX_MESSAGE_LENGTH: usize = 16384;

/// Next Protocol identifier for NTPv4.
pub const NEXT_PROTOCOL_NTPV4: u16 = 0;

/// AEAD algorithm identifier for AEAD_AES_SIV_CMAC_256 (RFC 5297).
pub const AEAD_AES_SIV_CMAC_256: u16 = 15;

/// IANA-assigned NTS-KE TCP port.
pub const NTS_KE_DEFAULT_PORT: u16 = 4460;

/// Registered NTP UDP port. Port negotiation is only sent for other values.
pub const NTP_DEFAULT_PORT: u16 = 123;

/// Error codes carried in an NTS-KE Error record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// The peer sent a critical record this side does not understand.
    UnrecognizedCriticalRecord,
    /// The request was malformed or missing mandatory records.
    BadRequest,
}

impl ErrorCode {
    /// Wire value of the error code.
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::UnrecognizedCriticalRecord => 0,
            ErrorCode::BadRequest => 1,
        }
    }

    /// Map a wire value back to a known error code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::UnrecognizedCriticalRecord),
            1 => Some(ErrorCode::BadRequest),
            _ => None,
        }
    }
}

/// A borrowed view of one decoded record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordRef<'a> {
    /// Whether the critical bit was set.
    pub critical: bool,
    /// Record type with the critical bit masked off.
    pub record_type: u16,
    /// Record body.
    pub body: &'a [u8],
}

impl<'a> RecordRef<'a> {
    /// Iterate the body as big-endian 16-bit values, ignoring a trailing odd byte.
    pub fn u16_values(&self) -> impl Iterator<Item = u16> + 'a {
        self.body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }
}

/// Decode the record at the start of `data`.
///
/// Returns the record and its encoded length, or `None` when fewer than four
/// header bytes are available or the declared body is not fully buffered yet.
pub fn decode_record(data: &[u8]) -> Option<(RecordRef<'_>, usize)> {
    if data.len() < RECORD_HEADER_LENGTH {
        return None;
    }
    let raw_type = u16::from_be_bytes([data[0], data[1]]);
    let body_length = u16::from_be_bytes([data[2], data[3]]) as usize;
    let total = RECORD_HEADER_LENGTH + body_length;
    if data.len() < total {
        return None;
    }
    let record = RecordRef {
        critical: raw_type & CRITICAL_BIT != 0,
        record_type: raw_type & !CRITICAL_BIT,
        body: &data[RECORD_HEADER_LENGTH..total],
    };
    Some((record, total))
}

/// Iterator over the complete records at the start of a buffer.
///
/// Stops silently at the first incomplete record.
pub struct Records<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = RecordRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (record, length) = decode_record(&self.data[self.offset..])?;
        self.offset += length;
        Some(record)
    }
}

/// Outcome of checking whether a buffered message is complete.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageFormat {
    /// More bytes are needed and the peer may still send them.
    Incomplete,
    /// The message can never become valid.
    Malformed,
    /// The message ends with a critical, empty End of Message record.
    Ok,
}

/// A capacity-bounded NTS-KE message buffer.
#[derive(Clone, Debug, Default)]
pub struct Message {
    data: Vec<u8>,
    parsed: usize,
    sent: usize,
    eof: bool,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Message::default()
    }

    /// Reset the buffer and all cursors.
    pub fn clear(&mut self) {
        self.data.clear();
        self.parsed = 0;
        self.sent = 0;
        self.eof = false;
    }

    /// Buffered bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when the buffer has reached its capacity.
    pub fn is_full(&self) -> bool {
        self.data.len() >= MAX_MESSAGE_LENGTH
    }

    /// Append one record.
    ///
    /// The record type is masked to 15 bits; the critical flag sets the high bit.
    pub fn append_record(
        &mut self,
        critical: bool,
        record_type: u16,
        body: &[u8],
    ) -> Result<(), RecordError> {
        if body.len() > MAX_BODY_LENGTH {
            return Err(RecordError::BodyTooLong { length: body.len() });
        }
        let needed = self.data.len() + RECORD_HEADER_LENGTH + body.len();
        if needed > MAX_MESSAGE_LENGTH {
            return Err(RecordError::MessageFull {
                needed,
                available: MAX_MESSAGE_LENGTH,
            });
        }

        let mut raw_type = record_type & !CRITICAL_BIT;
        if critical {
            raw_type |= CRITICAL_BIT;
        }
        self.data.extend_from_slice(&raw_type.to_be_bytes());
        self.data
            .extend_from_slice(&(body.len() as u16).to_be_bytes());
        self.data.extend_from_slice(body);
        Ok(())
    }

    /// Append a record whose body is a single big-endian `u16`.
    pub fn append_u16_record(
        &mut self,
        critical: bool,
        record_type: u16,
        value: u16,
    ) -> Result<(), RecordError> {
        self.append_record(critical, record_type, &value.to_be_bytes())
    }

    /// Append the critical End of Message record.
    pub fn append_end_of_message(&mut self) -> Result<(), RecordError> {
        self.append_record(true, RECORD_END_OF_MESSAGE, &[])
    }

    /// Read the record at the parse cursor and advance past it.
    ///
    /// `None` means more data is needed, not that the message is invalid.
    pub fn read_next_record(&mut self) -> Option<RecordRef<'_>> {
        let (record, length) = decode_record(&self.data[self.parsed..])?;
        self.parsed += length;
        Some(record)
    }

    /// Move the parse cursor back to the first record.
    pub fn rewind(&mut self) {
        self.parsed = 0;
    }

    /// Iterate all complete records from the start, independent of the parse cursor.
    pub fn records(&self) -> Records<'_> {
        Records {
            data: &self.data,
            offset: 0,
        }
    }

    /// Check whether the buffered bytes form a complete message.
    ///
    /// Parsing stops at the first End of Message record; anything after it is
    /// ignored. An End of Message record that is not critical or carries a
    /// body makes the message malformed.
    pub fn validate(&self) -> MessageFormat {
        for record in self.records() {
            if record.record_type == RECORD_END_OF_MESSAGE {
                if record.critical && record.body.is_empty() {
                    return MessageFormat::Ok;
                }
                return MessageFormat::Malformed;
            }
        }
        if self.eof {
            MessageFormat::Malformed
        } else {
            MessageFormat::Incomplete
        }
    }

    /// Mark that the peer has closed its side of the stream.
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    /// Whether the peer has closed its side of the stream.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Fill the spare capacity with `read` and keep what it returns.
    ///
    /// A zero-length read marks end of input. Fails without calling `read`
    /// when the buffer is already full.
    pub fn receive_with<F>(&mut self, read: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        let length = self.data.len();
        if length >= MAX_MESSAGE_LENGTH {
            return Err(RecordError::MessageFull {
                needed: length + 1,
                available: MAX_MESSAGE_LENGTH,
            }
            .into());
        }

        self.data.resize(MAX_MESSAGE_LENGTH, 0);
        let result = read(&mut self.data[length..]);
        let received = match &result {
            Ok(n) => (*n).min(MAX_MESSAGE_LENGTH - length),
            Err(_) => 0,
        };
        self.data.truncate(length + received);

        if received == 0 && result.is_ok() {
            self.eof = true;
        }
        result.map(|_| received)
    }

    /// Bytes not yet flushed to the peer.
    pub fn unsent(&self) -> &[u8] {
        &self.data[self.sent..]
    }

    /// Record that `n` more bytes were flushed.
    pub fn mark_sent(&mut self, n: usize) {
        self.sent = (self.sent + n).min(self.data.len());
    }

    /// True once every buffered byte has been flushed.
    pub fn is_sent(&self) -> bool {
        self.sent >= self.data.len()
    }
}
