// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! AEAD_AES_SIV_CMAC_256 (RFC 5297) as used by NTS for cookies and packets.
//!
//! Cookie and packet code go through the [`NtsAead`] trait so the concrete
//! cipher is only named here.

use std::fmt;

use aes_siv::aead::{Aead, Key, KeyInit, Payload};
use aes_siv::{Aes128SivAead, Nonce};

/// Key length of AES-SIV-CMAC-256 in bytes.
pub const KEY_LENGTH: usize = 32;

/// Nonce length used by NTS with AES-SIV-CMAC-256.
pub const NONCE_LENGTH: usize = 16;

/// Length of the synthetic IV that authenticates the ciphertext.
pub const TAG_LENGTH: usize = 16;

/// The AEAD rejected its input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AeadError {
    /// Nonce was not [`NONCE_LENGTH`] bytes.
    InvalidNonce,
    /// Encryption failed.
    Encrypt,
    /// The tag did not verify.
    Decrypt,
}

impl fmt::Display for AeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AeadError::InvalidNonce => write!(f, "AEAD nonce has wrong length"),
            AeadError::Encrypt => write!(f, "AEAD encryption failed"),
            AeadError::Decrypt => write!(f, "AEAD authentication failed"),
        }
    }
}

impl std::error::Error for AeadError {}

/// Operations NTS needs from an AEAD algorithm.
pub trait NtsAead {
    /// Encrypt `plaintext` under `nonce`, authenticating `aad` as well.
    fn encrypt(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, AeadError>;

    /// Verify and decrypt `ciphertext`.
    fn decrypt(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, AeadError>;

    /// Encrypt with a freshly drawn random nonce, returning `(nonce, ciphertext)`.
    fn seal(&self, aad: &[u8], plaintext: &[u8]) -> Result<([u8; NONCE_LENGTH], Vec<u8>), AeadError> {
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::fill(&mut nonce);
        let ciphertext = self.encrypt(&nonce, aad, plaintext)?;
        Ok((nonce, ciphertext))
    }
}

/// A keyed AES-SIV-CMAC-256 context.
pub struct SivCmac256 {
    cipher: Aes128SivAead,
}

impl SivCmac256 {
    /// Key a new context.
    pub fn new(key: &[u8; KEY_LENGTH]) -> Self {
        SivCmac256 {
            cipher: Aes128SivAead::new(Key::<Aes128SivAead>::from_slice(key)),
        }
    }

    /// Key a new context with fresh random key material.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rand::fill(&mut key);
        SivCmac256::new(&key)
    }
}

impl fmt::Debug for SivCmac256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SivCmac256 { .. }")
    }
}

impl NtsAead for SivCmac256 {
    fn encrypt(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, AeadError> {
        if nonce.len() != NONCE_LENGTH {
            return Err(AeadError::InvalidNonce);
        }
        self.cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| AeadError::Encrypt)
    }

    fn decrypt(
        &self,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, AeadError> {
        if nonce.len() != NONCE_LENGTH {
            return Err(AeadError::InvalidNonce);
        }
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| AeadError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let aead = SivCmac256::new(&[0x42; KEY_LENGTH]);
        let nonce = [0x01; NONCE_LENGTH];
        let ct = aead.encrypt(&nonce, b"header", b"secret").unwrap();
        assert_eq!(ct.len(), 6 + TAG_LENGTH);
        let pt = aead.decrypt(&nonce, b"header", &ct).unwrap();
        assert_eq!(pt, b"secret");
    }

    #[test]
    fn test_empty_plaintext_is_tag_only() {
        let aead = SivCmac256::generate();
        let (nonce, ct) = aead.seal(b"packet", &[]).unwrap();
        assert_eq!(ct.len(), TAG_LENGTH);
        assert!(aead.decrypt(&nonce, b"packet", &ct).unwrap().is_empty());
    }

    #[test]
    fn test_tampered_ciphertext() {
        let aead = SivCmac256::generate();
        let (nonce, mut ct) = aead.seal(&[], &[0xAB; 64]).unwrap();
        ct[20] ^= 0x01;
        assert_eq!(aead.decrypt(&nonce, &[], &ct), Err(AeadError::Decrypt));
    }

    #[test]
    fn test_wrong_aad() {
        let aead = SivCmac256::generate();
        let (nonce, ct) = aead.seal(b"one", b"data").unwrap();
        assert_eq!(aead.decrypt(&nonce, b"two", &ct), Err(AeadError::Decrypt));
    }

    #[test]
    fn test_wrong_key() {
        let a = SivCmac256::new(&[1; KEY_LENGTH]);
        let b = SivCmac256::new(&[2; KEY_LENGTH]);
        let (nonce, ct) = a.seal(&[], b"data").unwrap();
        assert_eq!(b.decrypt(&nonce, &[], &ct), Err(AeadError::Decrypt));
    }

    #[test]
    fn test_invalid_nonce_length() {
        let aead = SivCmac256::generate();
        assert_eq!(
            aead.encrypt(&[0; 12], &[], b"x"),
            Err(AeadError::InvalidNonce)
        );
        assert_eq!(
            aead.decrypt(&[0; 20], &[], &[0; 16]),
            Err(AeadError::InvalidNonce)
        );
    }

    #[test]
    fn test_fresh_nonces() {
        let aead = SivCmac256::generate();
        let (n1, _) = aead.seal(&[], b"x").unwrap();
        let (n2, _) = aead.seal(&[], b"x").unwrap();
        assert_ne!(n1, n2);
    }
}
