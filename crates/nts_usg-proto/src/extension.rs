// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTP extension field placement and parsing, and the NTS field types.
//!
//! Extension fields follow the NTPv4 extension field format defined in RFC 7822,
//! appended after the 48-byte NTP packet header. NTS (RFC 8915) defines specific
//! extension field types for authenticated NTP.
//!
//! # Extension Field Format (RFC 7822)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Field Type           |        Field Length           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! .                                                               .
//! .                       Field Value (variable)                  .
//! .                                                               .
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! [`add_field`] and [`packet_fields`] operate on a whole NTP packet, header
//! included. [`iter_extension_fields`] and [`write_extension_fields`] handle a
//! bare run of fields, such as the plaintext of the NTS encrypted extensions.

use crate::error::ParseError;

/// Length of the fixed NTP packet header.
pub const NTP_HEADER_LENGTH: usize = 48;

/// Largest packet this implementation builds: header plus 1024 bytes of fields.
pub const MAX_NTP_PACKET_LENGTH: usize = NTP_HEADER_LENGTH + 1024;

/// Length of a legacy NTPv4 MAC, which may trail the extension fields.
const LEGACY_MAC_LENGTH: usize = 24;

/// Minimum extension field length per RFC 7822.
pub const MIN_EXTENSION_FIELD_LENGTH: u16 = 16;

/// NTP association mode of a client request.
pub const MODE_CLIENT: u8 = 3;

/// NTP association mode of a server response.
pub const MODE_SERVER: u8 = 4;

// NTS extension field type codes (RFC 8915 Section 5.7).

/// Unique Identifier extension field type.
pub const UNIQUE_IDENTIFIER: u16 = 0x0104;

/// NTS Cookie extension field type.
pub const NTS_COOKIE: u16 = 0x0204;

/// NTS Cookie Placeholder extension field type.
pub const NTS_COOKIE_PLACEHOLDER: u16 = 0x0304;

/// NTS Authenticator and Encrypted Extension Fields extension field type.
pub const NTS_AUTHENTICATOR: u16 = 0x0404;

fn padded4(length: usize) -> usize {
    (length + 3) & !3
}

/// Version number from the first header byte.
pub fn header_version(packet: &[u8]) -> Option<u8> {
    packet.first().map(|b| (b >> 3) & 0x07)
}

/// Association mode from the first header byte.
pub fn header_mode(packet: &[u8]) -> Option<u8> {
    packet.first().map(|b| b & 0x07)
}

fn check_packet(packet: &[u8]) -> Result<(), ParseError> {
    if packet.len() < NTP_HEADER_LENGTH {
        return Err(ParseError::BufferTooShort {
            needed: NTP_HEADER_LENGTH,
            available: packet.len(),
        });
    }
    if packet.len() % 4 != 0 {
        return Err(ParseError::UnalignedPacket {
            length: packet.len(),
        });
    }
    Ok(())
}

/// Append an extension field to an NTP packet.
///
/// The packet must hold at least a full header and be 4-byte aligned. The
/// body is zero padded to a 4-byte boundary and the field to the RFC 7822
/// minimum of 16 bytes.
pub fn add_field(packet: &mut Vec<u8>, field_type: u16, body: &[u8]) -> Result<(), ParseError> {
    check_packet(packet)?;

    let field_length = padded4(4 + body.len()).max(MIN_EXTENSION_FIELD_LENGTH as usize);
    let new_length = packet.len() + field_length;
    if new_length > MAX_NTP_PACKET_LENGTH || field_length > u16::MAX as usize {
        return Err(ParseError::PacketTooLong { length: new_length });
    }

    packet.extend_from_slice(&field_type.to_be_bytes());
    packet.extend_from_slice(&(field_length as u16).to_be_bytes());
    packet.extend_from_slice(body);
    packet.resize(new_length, 0);
    Ok(())
}

/// A field located inside an NTP packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketField<'a> {
    /// Offset of the field header from the start of the packet.
    pub offset: usize,
    /// Field type and body. The body includes any trailing padding.
    pub field: ExtensionFieldRef<'a>,
}

/// Iterator over the extension fields of an NTP packet.
///
/// Created by [`packet_fields`]. Yields an error and then stops when a
/// field is malformed.
pub struct PacketFields<'a> {
    packet: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for PacketFields<'a> {
    type Item = Result<PacketField<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let remaining = self.packet.len() - self.offset;
        // Whatever is left may only be a legacy MAC.
        if remaining <= LEGACY_MAC_LENGTH {
            return None;
        }

        let data = &self.packet[self.offset..];
        let field_type = u16::from_be_bytes([data[0], data[1]]);
        let field_length = u16::from_be_bytes([data[2], data[3]]);
        let length = field_length as usize;

        if field_length < MIN_EXTENSION_FIELD_LENGTH || length % 4 != 0 {
            self.failed = true;
            return Some(Err(ParseError::InvalidExtensionLength {
                declared: field_length,
            }));
        }
        if length > remaining {
            self.failed = true;
            return Some(Err(ParseError::ExtensionOverflow));
        }

        let field = PacketField {
            offset: self.offset,
            field: ExtensionFieldRef {
                field_type,
                value: &data[4..length],
            },
        };
        self.offset += length;
        Some(Ok(field))
    }
}

/// Iterate the extension fields following the header of an NTP packet.
pub fn packet_fields(packet: &[u8]) -> Result<PacketFields<'_>, ParseError> {
    check_packet(packet)?;
    Ok(PacketFields {
        packet,
        offset: NTP_HEADER_LENGTH,
        failed: false,
    })
}

/// A borrowed view of an extension field (no allocation).
///
/// This type references data within the original byte buffer, avoiding
/// the heap allocation required by [`ExtensionField`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtensionFieldRef<'a> {
    /// The extension field type code.
    pub field_type: u16,
    /// The extension field value (variable length, excluding the 4-byte header).
    pub value: &'a [u8],
}

/// Iterator over a bare run of extension fields.
///
/// Created by [`iter_extension_fields`].
pub struct ExtensionFieldIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for ExtensionFieldIter<'a> {
    type Item = Result<ExtensionFieldRef<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = &self.data[self.offset..];
        if remaining.len() < 4 {
            return None;
        }

        let field_type = u16::from_be_bytes([remaining[0], remaining[1]]);
        let field_length = u16::from_be_bytes([remaining[2], remaining[3]]);

        if field_length < 4 {
            self.offset = self.data.len();
            return Some(Err(ParseError::InvalidExtensionLength {
                declared: field_length,
            }));
        }

        let value_length = (field_length - 4) as usize;
        let value_start = self.offset + 4;

        if value_start + value_length > self.data.len() {
            self.offset = self.data.len();
            return Some(Err(ParseError::ExtensionOverflow));
        }

        let value = &self.data[value_start..value_start + value_length];

        // Advance past value and padding to 4-byte boundary.
        let next_offset = self.offset + padded4(field_length as usize);
        self.offset = next_offset.min(self.data.len());

        Some(Ok(ExtensionFieldRef { field_type, value }))
    }
}

/// Iterate a bare run of extension fields without allocating.
pub fn iter_extension_fields(data: &[u8]) -> ExtensionFieldIter<'_> {
    ExtensionFieldIter { data, offset: 0 }
}

/// An owned extension field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtensionField {
    /// The extension field type code.
    pub field_type: u16,
    /// The extension field value (variable length, excluding the 4-byte header).
    pub value: Vec<u8>,
}

/// Serialize extension fields to a byte vector.
///
/// Each field is padded to a 4-byte boundary with zero bytes.
pub fn write_extension_fields(fields: &[ExtensionField]) -> Vec<u8> {
    let total: usize = fields.iter().map(|f| padded4(4 + f.value.len())).sum();
    let mut buf = Vec::with_capacity(total);
    for field in fields {
        let field_length = 4 + field.value.len();
        buf.extend_from_slice(&field.field_type.to_be_bytes());
        buf.extend_from_slice(&(field_length as u16).to_be_bytes());
        buf.extend_from_slice(&field.value);
        buf.resize(buf.len() + padded4(field_length) - field_length, 0);
    }
    buf
}

/// NTS Authenticator and Encrypted Extension Fields (RFC 8915 Section 5.6).
///
/// ```text
/// | nonce length (u16) | ciphertext length (u16) |
/// | nonce, padded to 4 bytes                     |
/// | ciphertext, padded to 4 bytes                |
/// ```
///
/// The ciphertext carries any encrypted extension fields followed by the
/// AEAD tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NtsAuthenticator {
    /// The AEAD nonce.
    pub nonce: Vec<u8>,
    /// The AEAD ciphertext (encrypted extensions + authentication tag).
    pub ciphertext: Vec<u8>,
}

impl NtsAuthenticator {
    /// Create an NTS Authenticator.
    pub fn new(nonce: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        NtsAuthenticator { nonce, ciphertext }
    }

    /// Encode the field body.
    pub fn to_body(&self) -> Vec<u8> {
        let nonce_padded = padded4(self.nonce.len());
        let ct_padded = padded4(self.ciphertext.len());
        let mut body = Vec::with_capacity(4 + nonce_padded + ct_padded);
        body.extend_from_slice(&(self.nonce.len() as u16).to_be_bytes());
        body.extend_from_slice(&(self.ciphertext.len() as u16).to_be_bytes());
        body.extend_from_slice(&self.nonce);
        body.resize(4 + nonce_padded, 0);
        body.extend_from_slice(&self.ciphertext);
        body.resize(4 + nonce_padded + ct_padded, 0);
        body
    }

    /// Decode a field body.
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        if body.len() < 4 {
            return Err(ParseError::BufferTooShort {
                needed: 4,
                available: body.len(),
            });
        }
        let nonce_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        let ct_len = u16::from_be_bytes([body[2], body[3]]) as usize;

        let nonce_start = 4;
        let ct_start = nonce_start + padded4(nonce_len);
        let needed = ct_start + padded4(ct_len);
        if needed > body.len() {
            return Err(ParseError::BufferTooShort {
                needed,
                available: body.len(),
            });
        }

        Ok(NtsAuthenticator {
            nonce: body[nonce_start..nonce_start + nonce_len].to_vec(),
            ciphertext: body[ct_start..ct_start + ct_len].to_vec(),
        })
    }
}
