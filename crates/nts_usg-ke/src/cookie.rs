// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Server key ring and cookie codec.
//!
//! # Cookie Format
//!
//! NTS cookies are opaque to the client (RFC 8915 Section 6). The
//! server-internal format is:
//!
//! ```text
//! [key_id: 4 bytes][nonce: 16 bytes][ciphertext: 64 bytes][tag: 16 bytes]
//! ```
//!
//! The plaintext is the client-to-server key followed by the
//! server-to-client key, sealed with AES-SIV-CMAC-256 under the current
//! server key with no associated data.
//!
//! # Key identifiers
//!
//! The low two bits of a key id are the ring slot holding that key, so
//! decoding never searches. A slot is reused
//! every `RING_SIZE` rotations, which permanently invalidates cookies minted
//! under the key it held.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use nts_proto::aead::{NtsAead, SivCmac256, KEY_LENGTH, NONCE_LENGTH, TAG_LENGTH};
use tracing::debug;

use crate::error::CookieError;

/// Number of server keys kept for decoding. Must be a power of two.
pub const RING_SIZE: usize = 4;

/// Delay between server key rotations.
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(3600);

/// Encoded length of every cookie this server mints.
pub const COOKIE_LENGTH: usize = 4 + NONCE_LENGTH + 2 * KEY_LENGTH + TAG_LENGTH;

const SLOT_MASK: u32 = RING_SIZE as u32 - 1;

/// Key ring shared between the NTS-KE service and the NTP request handler.
pub type SharedKeyRing = Arc<RwLock<KeyRing>>;

// ============================================================================
// Session keys
// ============================================================================

/// The pair of keys exported from one NTS-KE TLS session.
#[derive(Clone, Eq, PartialEq)]
pub struct SessionKeys {
    /// Client-to-server AEAD key.
    pub c2s: [u8; KEY_LENGTH],
    /// Server-to-client AEAD key.
    pub s2c: [u8; KEY_LENGTH],
}

impl SessionKeys {
    fn to_plaintext(&self) -> [u8; 2 * KEY_LENGTH] {
        let mut plaintext = [0u8; 2 * KEY_LENGTH];
        plaintext[..KEY_LENGTH].copy_from_slice(&self.c2s);
        plaintext[KEY_LENGTH..].copy_from_slice(&self.s2c);
        plaintext
    }

    fn from_plaintext(plaintext: &[u8]) -> Option<Self> {
        if plaintext.len() != 2 * KEY_LENGTH {
            return None;
        }
        let mut keys = SessionKeys {
            c2s: [0u8; KEY_LENGTH],
            s2c: [0u8; KEY_LENGTH],
        };
        keys.c2s.copy_from_slice(&plaintext[..KEY_LENGTH]);
        keys.s2c.copy_from_slice(&plaintext[KEY_LENGTH..]);
        Some(keys)
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys { .. }")
    }
}

// ============================================================================
// Cookie
// ============================================================================

/// A decoded cookie envelope.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cookie {
    /// Identifier of the server key that sealed the cookie.
    pub key_id: u32,
    /// AEAD nonce.
    pub nonce: [u8; NONCE_LENGTH],
    /// Sealed session keys followed by the tag.
    pub ciphertext: Vec<u8>,
}

impl Cookie {
    /// Serialize to the opaque form handed to clients.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + NONCE_LENGTH + self.ciphertext.len());
        bytes.extend_from_slice(&self.key_id.to_be_bytes());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parse the opaque form. Anything but [`COOKIE_LENGTH`] bytes is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CookieError> {
        if bytes.len() != COOKIE_LENGTH {
            return Err(CookieError::Length {
                length: bytes.len(),
            });
        }
        let key_id = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let mut nonce = [0u8; NONCE_LENGTH];
        nonce.copy_from_slice(&bytes[4..4 + NONCE_LENGTH]);
        Ok(Cookie {
            key_id,
            nonce,
            ciphertext: bytes[4 + NONCE_LENGTH..].to_vec(),
        })
    }
}

// ============================================================================
// Key ring
// ============================================================================

struct ServerKey {
    id: u32,
    aead: SivCmac256,
}

/// Rotating set of server keys used to seal and open cookies.
pub struct KeyRing {
    slots: [Option<ServerKey>; RING_SIZE],
    current: usize,
}

impl KeyRing {
    /// Create a ring holding one freshly generated current key.
    pub fn new() -> Self {
        let mut ring = KeyRing {
            slots: Default::default(),
            current: RING_SIZE - 1,
        };
        ring.rotate();
        ring
    }

    /// Create a ring wrapped for sharing with the NTP request handler.
    pub fn shared() -> SharedKeyRing {
        Arc::new(RwLock::new(KeyRing::new()))
    }

    /// Advance to the next slot and fill it with a new random key.
    pub fn rotate(&mut self) {
        self.current = (self.current + 1) % RING_SIZE;
        let id = (rand::random::<u32>() & !SLOT_MASK) | self.current as u32;
        self.slots[self.current] = Some(ServerKey {
            id,
            aead: SivCmac256::generate(),
        });
        debug!(key_id = format_args!("{id:08x}"), "generated server key");
    }

    /// Identifier of the key new cookies are sealed with.
    pub fn current_id(&self) -> u32 {
        self.current_key().id
    }

    fn current_key(&self) -> &ServerKey {
        self.slots[self.current]
            .as_ref()
            .expect("key ring always holds a current key")
    }

    /// Seal a key pair into a cookie under the current server key.
    pub fn mint_cookie(&self, keys: &SessionKeys) -> Cookie {
        let key = self.current_key();
        let (nonce, ciphertext) = key
            .aead
            .seal(&[], &keys.to_plaintext())
            .expect("AES-SIV sealing of a 64-byte plaintext cannot fail");
        Cookie {
            key_id: key.id,
            nonce,
            ciphertext,
        }
    }

    /// Open a cookie sealed by any key still resident in the ring.
    pub fn decode_cookie(&self, cookie: &Cookie) -> Result<SessionKeys, CookieError> {
        let slot = (cookie.key_id & SLOT_MASK) as usize;
        let key = match &self.slots[slot] {
            Some(key) if key.id == cookie.key_id => key,
            _ => {
                return Err(CookieError::UnknownKey {
                    key_id: cookie.key_id,
                });
            }
        };

        let plaintext = key
            .aead
            .decrypt(&cookie.nonce, &[], &cookie.ciphertext)
            .map_err(|_| CookieError::Authentication)?;
        SessionKeys::from_plaintext(&plaintext).ok_or(CookieError::Length {
            length: 4 + NONCE_LENGTH + cookie.ciphertext.len(),
        })
    }

    /// Parse and open a cookie in its opaque form.
    pub fn decode_cookie_bytes(&self, bytes: &[u8]) -> Result<SessionKeys, CookieError> {
        self.decode_cookie(&Cookie::from_bytes(bytes)?)
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        KeyRing::new()
    }
}
