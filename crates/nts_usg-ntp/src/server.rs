// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Server side of NTS-protected NTP (RFC 8915 Section 5.7).
//!
//! [`check_request_auth`] validates a client request against the key ring
//! shared with the NTS-KE service and recovers the session keys from its
//! cookie. [`generate_response_auth`] then appends the echoed identifier and
//! an authenticator whose encrypted part carries the replacement cookies.
//!
//! ```text
//! request:  header | UID | cookie | placeholder* | authenticator
//! response: header | UID | authenticator { cookie* }
//! ```

use nts_ke::cookie::{KeyRing, SessionKeys};
use nts_ke::exchange::MAX_COOKIES;
use nts_proto::aead::{NtsAead, SivCmac256};
use nts_proto::extension::{
    self, ExtensionField, NtsAuthenticator, MODE_CLIENT, NTS_AUTHENTICATOR, NTS_COOKIE,
    NTS_COOKIE_PLACEHOLDER, UNIQUE_IDENTIFIER,
};
use tracing::debug;

use crate::error::NtsAuthError;
use crate::{MIN_UNIQUE_ID_LENGTH, NTP_VERSION};

/// What a verified request tells the server about its response.
#[derive(Debug)]
pub struct RequestAuth {
    /// Unique identifier to echo.
    pub unique_id: Vec<u8>,
    /// Keys recovered from the request cookie.
    pub keys: SessionKeys,
    /// Fresh cookies to return: one for the spent cookie plus one per placeholder.
    pub cookies_requested: usize,
}

/// Position of the authenticator field and the parsed field itself.
pub(crate) struct Located {
    pub offset: usize,
    pub authenticator: NtsAuthenticator,
}

/// Verify an NTS-protected client request.
///
/// Exactly one cookie is accepted. The authenticator tag must verify under
/// the client-to-server key sealed in that cookie, with everything preceding
/// the authenticator as associated data. Fields after the authenticator are
/// not covered by the tag and are ignored.
pub fn check_request_auth(packet: &[u8], ring: &KeyRing) -> Result<RequestAuth, NtsAuthError> {
    let fields = extension::packet_fields(packet)?;
    check_header(packet, MODE_CLIENT)?;

    let mut unique_id = None;
    let mut cookie = None;
    let mut placeholders = 0usize;
    let mut located = None;

    for field in fields {
        let field = field?;
        match field.field.field_type {
            UNIQUE_IDENTIFIER => {
                if unique_id.is_none() {
                    unique_id = Some(field.field.value);
                }
            }
            NTS_COOKIE => {
                if cookie.replace(field.field.value).is_some() {
                    return Err(NtsAuthError::DuplicateCookie);
                }
            }
            NTS_COOKIE_PLACEHOLDER => placeholders += 1,
            NTS_AUTHENTICATOR => {
                located = Some(Located {
                    offset: field.offset,
                    authenticator: NtsAuthenticator::parse(field.field.value)?,
                });
                break;
            }
            _ => {}
        }
    }

    let unique_id = unique_id.ok_or(NtsAuthError::MissingField {
        field: "Unique Identifier",
    })?;
    if unique_id.len() < MIN_UNIQUE_ID_LENGTH {
        return Err(NtsAuthError::Parse(
            nts_proto::error::ParseError::InvalidField {
                field: "Unique Identifier",
                value: unique_id.len() as u32,
            },
        ));
    }
    let cookie = cookie.ok_or(NtsAuthError::MissingField {
        field: "NTS Cookie",
    })?;
    let located = located.ok_or(NtsAuthError::MissingField {
        field: "NTS Authenticator",
    })?;

    let keys = ring.decode_cookie_bytes(cookie)?;
    SivCmac256::new(&keys.c2s)
        .decrypt(
            &located.authenticator.nonce,
            &packet[..located.offset],
            &located.authenticator.ciphertext,
        )
        .map_err(|_| NtsAuthError::Authentication)?;

    let cookies_requested = (1 + placeholders).min(MAX_COOKIES);
    debug!(placeholders, cookies_requested, "verified NTS request");
    Ok(RequestAuth {
        unique_id: unique_id.to_vec(),
        keys,
        cookies_requested,
    })
}

/// Append NTS fields to a response header.
///
/// `packet` must already hold the 48-byte NTP response header. The cookies
/// are sealed inside the authenticator under the server-to-client key.
pub fn generate_response_auth(
    request: &RequestAuth,
    ring: &KeyRing,
    packet: &mut Vec<u8>,
) -> Result<(), NtsAuthError> {
    extension::add_field(packet, UNIQUE_IDENTIFIER, &request.unique_id)?;

    let cookies: Vec<ExtensionField> = (0..request.cookies_requested)
        .map(|_| ExtensionField {
            field_type: NTS_COOKIE,
            value: ring.mint_cookie(&request.keys).to_bytes(),
        })
        .collect();
    let plaintext = extension::write_extension_fields(&cookies);

    let (nonce, ciphertext) = SivCmac256::new(&request.keys.s2c)
        .seal(&packet[..], &plaintext)
        .map_err(NtsAuthError::Seal)?;
    let authenticator = NtsAuthenticator::new(nonce.to_vec(), ciphertext);
    extension::add_field(packet, NTS_AUTHENTICATOR, &authenticator.to_body())?;
    Ok(())
}

pub(crate) fn check_header(packet: &[u8], expected_mode: u8) -> Result<(), NtsAuthError> {
    let version = extension::header_version(packet).unwrap_or(0);
    if version != NTP_VERSION {
        return Err(NtsAuthError::UnsupportedVersion { version });
    }
    let mode = extension::header_mode(packet).unwrap_or(0);
    if mode != expected_mode {
        return Err(NtsAuthError::UnexpectedMode { mode });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nts_ke::error::CookieError;
    use nts_proto::error::ParseError;
    use nts_proto::extension::{iter_extension_fields, packet_fields, NTP_HEADER_LENGTH};

    fn keys() -> SessionKeys {
        SessionKeys {
            c2s: [0x11; 32],
            s2c: [0x22; 32],
        }
    }

    fn header(mode: u8) -> Vec<u8> {
        let mut packet = vec![0u8; NTP_HEADER_LENGTH];
        packet[0] = (NTP_VERSION << 3) | mode;
        packet
    }

    /// Build a client request by hand, sealed with `c2s`.
    fn request(ring: &KeyRing, c2s: &[u8; 32], placeholders: usize) -> Vec<u8> {
        let cookie = ring.mint_cookie(&keys()).to_bytes();
        let mut packet = header(MODE_CLIENT);
        extension::add_field(&mut packet, UNIQUE_IDENTIFIER, &[0x5A; 32]).unwrap();
        extension::add_field(&mut packet, NTS_COOKIE, &cookie).unwrap();
        for _ in 0..placeholders {
            extension::add_field(&mut packet, NTS_COOKIE_PLACEHOLDER, &[0; 60]).unwrap();
        }
        let (nonce, ct) = SivCmac256::new(c2s).seal(&packet, &[]).unwrap();
        let auth = NtsAuthenticator::new(nonce.to_vec(), ct);
        extension::add_field(&mut packet, NTS_AUTHENTICATOR, &auth.to_body()).unwrap();
        packet
    }

    #[test]
    fn test_valid_request() {
        let ring = KeyRing::new();
        let packet = request(&ring, &keys().c2s, 3);
        let auth = check_request_auth(&packet, &ring).unwrap();
        assert_eq!(auth.unique_id, vec![0x5A; 32]);
        assert_eq!(auth.keys, keys());
        assert_eq!(auth.cookies_requested, 4);
    }

    #[test]
    fn test_cookie_request_is_capped() {
        let ring = KeyRing::new();
        let packet = request(&ring, &keys().c2s, 8);
        let auth = check_request_auth(&packet, &ring).unwrap();
        assert_eq!(auth.cookies_requested, MAX_COOKIES);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let ring = KeyRing::new();
        let packet = request(&ring, &[0x99; 32], 0);
        assert!(matches!(
            check_request_auth(&packet, &ring),
            Err(NtsAuthError::Authentication)
        ));
    }

    #[test]
    fn test_tampered_header_fails_authentication() {
        let ring = KeyRing::new();
        let mut packet = request(&ring, &keys().c2s, 0);
        packet[40] ^= 0x01;
        assert!(matches!(
            check_request_auth(&packet, &ring),
            Err(NtsAuthError::Authentication)
        ));
    }

    #[test]
    fn test_rotated_out_cookie() {
        let mut ring = KeyRing::new();
        let packet = request(&ring, &keys().c2s, 0);
        for _ in 0..nts_ke::cookie::RING_SIZE {
            ring.rotate();
        }
        assert!(matches!(
            check_request_auth(&packet, &ring),
            Err(NtsAuthError::Cookie(CookieError::UnknownKey { .. }))
        ));
    }

    #[test]
    fn test_two_cookies_rejected() {
        let ring = KeyRing::new();
        let cookie = ring.mint_cookie(&keys()).to_bytes();
        let mut packet = header(MODE_CLIENT);
        extension::add_field(&mut packet, UNIQUE_IDENTIFIER, &[1; 32]).unwrap();
        extension::add_field(&mut packet, NTS_COOKIE, &cookie).unwrap();
        extension::add_field(&mut packet, NTS_COOKIE, &cookie).unwrap();
        assert!(matches!(
            check_request_auth(&packet, &ring),
            Err(NtsAuthError::DuplicateCookie)
        ));
    }

    #[test]
    fn test_missing_fields() {
        let ring = KeyRing::new();
        let mut packet = header(MODE_CLIENT);
        assert!(matches!(
            check_request_auth(&packet, &ring),
            Err(NtsAuthError::MissingField {
                field: "Unique Identifier"
            })
        ));

        extension::add_field(&mut packet, UNIQUE_IDENTIFIER, &[1; 32]).unwrap();
        assert!(matches!(
            check_request_auth(&packet, &ring),
            Err(NtsAuthError::MissingField { field: "NTS Cookie" })
        ));

        let cookie = ring.mint_cookie(&keys()).to_bytes();
        extension::add_field(&mut packet, NTS_COOKIE, &cookie).unwrap();
        assert!(matches!(
            check_request_auth(&packet, &ring),
            Err(NtsAuthError::MissingField {
                field: "NTS Authenticator"
            })
        ));
    }

    #[test]
    fn test_short_unique_id_rejected() {
        let ring = KeyRing::new();
        let mut packet = header(MODE_CLIENT);
        extension::add_field(&mut packet, UNIQUE_IDENTIFIER, &[1; 16]).unwrap();
        let cookie = ring.mint_cookie(&keys()).to_bytes();
        extension::add_field(&mut packet, NTS_COOKIE, &cookie).unwrap();
        assert!(matches!(
            check_request_auth(&packet, &ring),
            Err(NtsAuthError::Parse(ParseError::InvalidField {
                field: "Unique Identifier",
                value: 16,
            }))
        ));
    }

    #[test]
    fn test_trailing_short_field_is_legacy_mac() {
        let ring = KeyRing::new();
        for length in [16, 20] {
            let mut packet = header(MODE_CLIENT);
            extension::add_field(&mut packet, UNIQUE_IDENTIFIER, &vec![1; length]).unwrap();
            assert!(packet.len() - 48 <= 24);
            assert!(matches!(
                check_request_auth(&packet, &ring),
                Err(NtsAuthError::MissingField {
                    field: "Unique Identifier"
                })
            ));
        }
    }

    #[test]
    fn test_header_checks() {
        let ring = KeyRing::new();
        let mut packet = request(&ring, &keys().c2s, 0);
        packet[0] = (NTP_VERSION << 3) | 4;
        assert!(matches!(
            check_request_auth(&packet, &ring),
            Err(NtsAuthError::UnexpectedMode { mode: 4 })
        ));
        packet[0] = (3 << 3) | MODE_CLIENT;
        assert!(matches!(
            check_request_auth(&packet, &ring),
            Err(NtsAuthError::UnsupportedVersion { version: 3 })
        ));
        assert!(matches!(
            check_request_auth(&[0u8; 20], &ring),
            Err(NtsAuthError::Parse(_))
        ));
    }

    #[test]
    fn test_response_carries_sealed_cookies() {
        let ring = KeyRing::new();
        let packet = request(&ring, &keys().c2s, 2);
        let auth = check_request_auth(&packet, &ring).unwrap();

        let mut response = header(4);
        generate_response_auth(&auth, &ring, &mut response).unwrap();

        let fields: Vec<_> = packet_fields(&response)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].field.field_type, UNIQUE_IDENTIFIER);
        assert_eq!(fields[0].field.value, &[0x5A; 32][..]);
        assert_eq!(fields[1].field.field_type, NTS_AUTHENTICATOR);

        let authenticator = NtsAuthenticator::parse(fields[1].field.value).unwrap();
        let plaintext = SivCmac256::new(&keys().s2c)
            .decrypt(
                &authenticator.nonce,
                &response[..fields[1].offset],
                &authenticator.ciphertext,
            )
            .unwrap();
        let cookies: Vec<_> = iter_extension_fields(&plaintext)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(cookies.len(), 3);
        for cookie in cookies {
            assert_eq!(cookie.field_type, NTS_COOKIE);
            assert_eq!(ring.decode_cookie_bytes(cookie.value).unwrap(), keys());
        }
    }
}
