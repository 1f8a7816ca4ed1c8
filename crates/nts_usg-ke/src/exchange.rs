// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE request and response negotiation.
//!
//! Pure functions over a buffered [`Message`]; the session state machines
//! decide when to call them.

use tracing::debug;

use crate::cookie::{KeyRing, SessionKeys};
use crate::error::{ProtocolError, RecordError};
use nts_proto::record::{
    ErrorCode, Message, RecordRef, AEAD_AES_SIV_CMAC_256, NEXT_PROTOCOL_NTPV4, NTP_DEFAULT_PORT,
    RECORD_AEAD_ALGORITHM, RECORD_COOKIE, RECORD_END_OF_MESSAGE, RECORD_ERROR,
    RECORD_NEXT_PROTOCOL, RECORD_NTPV4_PORT, RECORD_NTPV4_SERVER, RECORD_WARNING,
};

/// Most cookies a client keeps from one response.
pub const MAX_COOKIES: usize = 8;

/// Longest cookie a client is willing to store.
pub const MAX_COOKIE_LENGTH: usize = 256;

// ============================================================================
// Server side
// ============================================================================

/// What a well-formed request offered.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Negotiated {
    /// NTPv4 was among the offered next protocols.
    pub ntpv4: bool,
    /// AES-SIV-CMAC-256 was among the offered AEAD algorithms.
    pub aes_siv: bool,
}

impl Negotiated {
    /// Whether cookies can be issued for this request.
    pub fn is_complete(&self) -> bool {
        self.ntpv4 && self.aes_siv
    }
}

/// Parse a validated request message.
///
/// Returns the error code to answer with when the request is unacceptable.
pub fn parse_request(message: &Message) -> Result<Negotiated, ErrorCode> {
    let mut negotiated = Negotiated::default();
    let mut has_next_protocol = false;
    let mut has_aead = false;

    for record in message.records() {
        match record.record_type {
            RECORD_END_OF_MESSAGE => break,
            RECORD_NEXT_PROTOCOL => {
                if !record.critical || !is_u16_list(&record) {
                    return Err(ErrorCode::BadRequest);
                }
                has_next_protocol = true;
                negotiated.ntpv4 |= record.u16_values().any(|p| p == NEXT_PROTOCOL_NTPV4);
            }
            RECORD_AEAD_ALGORITHM => {
                if !is_u16_list(&record) {
                    return Err(ErrorCode::BadRequest);
                }
                has_aead = true;
                negotiated.aes_siv |= record.u16_values().any(|a| a == AEAD_AES_SIV_CMAC_256);
            }
            RECORD_ERROR | RECORD_WARNING | RECORD_COOKIE => {
                return Err(ErrorCode::BadRequest);
            }
            other if record.critical => {
                debug!(record_type = other, "unrecognized critical record in request");
                return Err(ErrorCode::UnrecognizedCriticalRecord);
            }
            _ => {}
        }
    }

    if !has_next_protocol || !has_aead {
        return Err(ErrorCode::BadRequest);
    }
    Ok(negotiated)
}

fn is_u16_list(record: &RecordRef<'_>) -> bool {
    record.body.len() >= 2 && record.body.len() % 2 == 0
}

/// Builds NTS-KE responses from the server's negotiation settings.
#[derive(Clone, Debug)]
pub struct Responder {
    ntp_server: Option<String>,
    ntp_port: u16,
    cookie_count: usize,
}

impl Responder {
    /// Create a responder advertising `ntp_server` and `ntp_port`.
    pub fn new(ntp_server: Option<String>, ntp_port: u16, cookie_count: usize) -> Self {
        Responder {
            ntp_server,
            ntp_port,
            cookie_count,
        }
    }

    /// Write the response to `verdict` into `out`, replacing its contents.
    ///
    /// Cookies are only issued when both NTPv4 and AES-SIV-CMAC-256 were
    /// offered and `keys` is available.
    pub fn write_response(
        &self,
        verdict: Result<Negotiated, ErrorCode>,
        keys: Option<&SessionKeys>,
        ring: &KeyRing,
        out: &mut Message,
    ) -> Result<(), RecordError> {
        out.clear();

        let negotiated = match verdict {
            Ok(negotiated) => negotiated,
            Err(code) => {
                debug!(code = code.code(), "NTS-KE error response");
                out.append_u16_record(true, RECORD_ERROR, code.code())?;
                return out.append_end_of_message();
            }
        };

        if negotiated.ntpv4 {
            out.append_u16_record(true, RECORD_NEXT_PROTOCOL, NEXT_PROTOCOL_NTPV4)?;
        } else {
            out.append_record(true, RECORD_NEXT_PROTOCOL, &[])?;
        }
        if negotiated.aes_siv {
            out.append_u16_record(true, RECORD_AEAD_ALGORITHM, AEAD_AES_SIV_CMAC_256)?;
        } else {
            out.append_record(true, RECORD_AEAD_ALGORITHM, &[])?;
        }

        if negotiated.is_complete() {
            if let Some(server) = &self.ntp_server {
                out.append_record(false, RECORD_NTPV4_SERVER, server.as_bytes())?;
            }
            if self.ntp_port != NTP_DEFAULT_PORT {
                out.append_u16_record(true, RECORD_NTPV4_PORT, self.ntp_port)?;
            }
            if let Some(keys) = keys {
                for _ in 0..self.cookie_count {
                    let cookie = ring.mint_cookie(keys);
                    out.append_record(false, RECORD_COOKIE, &cookie.to_bytes())?;
                }
            }
        }

        debug!(
            ntpv4 = negotiated.ntpv4,
            aes_siv = negotiated.aes_siv,
            cookies = if negotiated.is_complete() && keys.is_some() {
                self.cookie_count
            } else {
                0
            },
            "NTS-KE response"
        );
        out.append_end_of_message()
    }
}

// ============================================================================
// Client side
// ============================================================================

/// Write the canonical client request into `out`, replacing its contents.
pub fn build_request(out: &mut Message) -> Result<(), RecordError> {
    out.clear();
    out.append_u16_record(true, RECORD_NEXT_PROTOCOL, NEXT_PROTOCOL_NTPV4)?;
    out.append_u16_record(true, RECORD_AEAD_ALGORITHM, AEAD_AES_SIV_CMAC_256)?;
    out.append_end_of_message()
}

/// Parameters a server granted in a successful response.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeResponse {
    /// Cookies in the order received.
    pub cookies: Vec<Vec<u8>>,
    /// NTP server negotiated via the Server record.
    pub ntp_server: Option<String>,
    /// NTP port negotiated via the Port record.
    pub ntp_port: Option<u16>,
}

/// Parse a validated response message.
pub fn parse_response(message: &Message) -> Result<KeResponse, ProtocolError> {
    let mut response = KeResponse::default();
    let mut next_protocol = false;
    let mut aead = false;

    for record in message.records() {
        match record.record_type {
            RECORD_END_OF_MESSAGE => break,
            RECORD_NEXT_PROTOCOL => {
                if !record.critical || single_u16(&record) != Some(NEXT_PROTOCOL_NTPV4) {
                    return Err(ProtocolError::UnexpectedNextProtocol);
                }
                next_protocol = true;
            }
            RECORD_AEAD_ALGORITHM => {
                if single_u16(&record) != Some(AEAD_AES_SIV_CMAC_256) {
                    return Err(ProtocolError::UnexpectedAeadAlgorithm);
                }
                aead = true;
            }
            RECORD_ERROR => {
                let code = single_u16(&record).ok_or_else(|| invalid(&record))?;
                return Err(ProtocolError::ErrorRecord { code });
            }
            RECORD_WARNING => {
                let code = single_u16(&record).ok_or_else(|| invalid(&record))?;
                return Err(ProtocolError::WarningRecord { code });
            }
            RECORD_COOKIE => {
                debug!(length = record.body.len(), "NTS-KE cookie");
                if record.body.len() <= MAX_COOKIE_LENGTH && response.cookies.len() < MAX_COOKIES
                {
                    response.cookies.push(record.body.to_vec());
                }
            }
            RECORD_NTPV4_SERVER => {
                if record.body.len() < 2 {
                    return Err(invalid(&record));
                }
                let name = std::str::from_utf8(record.body).map_err(|_| invalid(&record))?;
                response.ntp_server = Some(name.to_owned());
            }
            RECORD_NTPV4_PORT => {
                response.ntp_port = Some(single_u16(&record).ok_or_else(|| invalid(&record))?);
            }
            other => {
                debug!(
                    record_type = other,
                    length = record.body.len(),
                    critical = record.critical,
                    "unknown NTS-KE record"
                );
                if record.critical {
                    return Err(ProtocolError::UnrecognizedCriticalRecord { record_type: other });
                }
            }
        }
    }

    if !next_protocol {
        return Err(ProtocolError::UnexpectedNextProtocol);
    }
    if !aead {
        return Err(ProtocolError::UnexpectedAeadAlgorithm);
    }
    if response.cookies.is_empty() {
        return Err(ProtocolError::NoCookies);
    }
    Ok(response)
}

fn single_u16(record: &RecordRef<'_>) -> Option<u16> {
    match record.body {
        [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

fn invalid(record: &RecordRef<'_>) -> ProtocolError {
    ProtocolError::InvalidRecord {
        record_type: record.record_type,
        length: record.body.len(),
    }
}
