// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE server configuration.

use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pki_types::pem::PemObject;

use crate::cookie::ROTATION_INTERVAL;
use crate::error::ConfigError;
use nts_proto::record::{NTP_DEFAULT_PORT, NTS_KE_DEFAULT_PORT};

/// Default number of cookies issued per NTS-KE session.
pub const DEFAULT_COOKIE_COUNT: usize = 8;

/// Default inactivity timeout of one NTS-KE session.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of concurrently served NTS-KE sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Configuration for an NTS-KE server.
pub struct NtsKeServerConfig {
    /// TLS certificate chain (DER encoded).
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key corresponding to the certificate (DER encoded).
    pub private_key: PrivateKeyDer<'static>,
    /// TCP port to listen on (default: 4460).
    pub port: u16,
    /// Also listen on the IPv6 wildcard address when the host supports it.
    pub ipv6: bool,
    /// NTP server name to advertise via the Server record.
    /// If `None`, clients use the NTS-KE server's own address.
    pub ntp_server: Option<String>,
    /// NTP port the cookies are valid for. A Port record is only sent when
    /// this differs from 123.
    pub ntp_port: u16,
    /// Number of cookies to issue per NTS-KE session (default: 8).
    pub cookie_count: usize,
    /// Inactivity timeout after which a session is force-closed.
    pub session_timeout: Duration,
    /// Size of the session pool.
    pub max_sessions: usize,
    /// Delay between server key rotations.
    pub rotation_interval: Duration,
}

impl NtsKeServerConfig {
    /// Create a config from PEM-encoded certificate and private key bytes.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, ConfigError> {
        let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::InvalidTlsCredentials {
                detail: format!("certificate chain: {e}"),
            })?;
        if certs.is_empty() {
            return Err(ConfigError::InvalidTlsCredentials {
                detail: "no certificate found in PEM input".to_string(),
            });
        }

        let key =
            PrivateKeyDer::from_pem_slice(key_pem).map_err(|e| ConfigError::InvalidTlsCredentials {
                detail: format!("private key: {e}"),
            })?;

        Ok(NtsKeServerConfig {
            cert_chain: certs,
            private_key: key,
            port: NTS_KE_DEFAULT_PORT,
            ipv6: true,
            ntp_server: None,
            ntp_port: NTP_DEFAULT_PORT,
            cookie_count: DEFAULT_COOKIE_COUNT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            rotation_interval: ROTATION_INTERVAL,
        })
    }
}
