// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Client side of NTS-protected NTP.
//!
//! An [`NtsClient`] holds the cookies and AEAD contexts from its last key
//! exchange. Every request spends one cookie and asks for enough new ones to
//! fill the jar again; when the jar runs dry, [`NtsClient::prepare_for_auth`]
//! runs a fresh NTS-KE exchange.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> Result<(), nts_ntp::error::NtsAuthError> {
//! use std::sync::Arc;
//! use nts_ntp::client::{NtsClient, NtsClientConfig};
//!
//! let tls = Arc::new(nts_ke::tls_config::client_config(None)?);
//! let mut client = NtsClient::new(NtsClientConfig::new("time.cloudflare.com", tls));
//! client.prepare_for_auth().await?;
//!
//! let mut packet = vec![0u8; 48];
//! packet[0] = 0x23; // NTPv4, client mode
//! client.generate_request_auth(&mut packet)?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nts_ke::client::NtsKeConnector;
use nts_ke::config::DEFAULT_SESSION_TIMEOUT;
use nts_ke::error::NtsKeError;
use nts_ke::exchange::{MAX_COOKIES, MAX_COOKIE_LENGTH};
use nts_ke::session::KeOutcome;
use nts_proto::aead::{NtsAead, SivCmac256};
use nts_proto::extension::{
    self, NtsAuthenticator, MODE_SERVER, NTS_AUTHENTICATOR, NTS_COOKIE, NTS_COOKIE_PLACEHOLDER,
    UNIQUE_IDENTIFIER,
};
use nts_proto::record::{NTP_DEFAULT_PORT, NTS_KE_DEFAULT_PORT};
use tracing::{debug, warn};

use crate::error::NtsAuthError;
use crate::server::{check_header, Located};
use crate::MIN_UNIQUE_ID_LENGTH;

/// Where and how to run key establishment.
#[derive(Clone, Debug)]
pub struct NtsClientConfig {
    /// NTS-KE server name, used for the TLS certificate check and DNS.
    pub server_name: String,
    /// NTS-KE port.
    pub port: u16,
    /// TLS configuration (see [`nts_ke::tls_config::client_config`]).
    pub tls_config: Arc<rustls::ClientConfig>,
    /// Timeout for one key exchange.
    pub timeout: Duration,
}

impl NtsClientConfig {
    /// Configuration for `server_name` on the default port and timeout.
    pub fn new(server_name: impl Into<String>, tls_config: Arc<rustls::ClientConfig>) -> Self {
        NtsClientConfig {
            server_name: server_name.into(),
            port: NTS_KE_DEFAULT_PORT,
            tls_config,
            timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

struct Contexts {
    c2s: SivCmac256,
    s2c: SivCmac256,
}

/// NTS state for one NTP server.
pub struct NtsClient {
    config: NtsClientConfig,
    connector: NtsKeConnector,
    contexts: Option<Contexts>,
    cookies: VecDeque<Vec<u8>>,
    ntp_address: Option<SocketAddr>,
    pending_id: Option<[u8; MIN_UNIQUE_ID_LENGTH]>,
}

impl NtsClient {
    /// Create a client with an empty cookie jar.
    pub fn new(config: NtsClientConfig) -> Self {
        let connector =
            NtsKeConnector::new(config.tls_config.clone()).with_timeout(config.timeout);
        NtsClient {
            config,
            connector,
            contexts: None,
            cookies: VecDeque::with_capacity(MAX_COOKIES),
            ntp_address: None,
            pending_id: None,
        }
    }

    /// Make sure a request can be authenticated, running NTS-KE if no cookie is left.
    ///
    /// Every resolved address of the NTS-KE server is tried in turn.
    pub async fn prepare_for_auth(&mut self) -> Result<(), NtsAuthError> {
        if self.contexts.is_some() && !self.cookies.is_empty() {
            return Ok(());
        }

        let name = self.config.server_name.clone();
        let addrs = tokio::net::lookup_host((name.as_str(), self.config.port))
            .await
            .map_err(NtsKeError::Io)?;

        let mut last_error = NtsKeError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{name} did not resolve to any address"),
        ));
        for addr in addrs {
            match self.connector.exchange(addr, &name).await {
                Ok(outcome) => {
                    let ntp_address = resolve_ntp_address(&outcome, addr).await?;
                    self.install(outcome, ntp_address);
                    return Ok(());
                }
                Err(e) => {
                    warn!(server = %name, %addr, error = %e, "NTS-KE attempt failed");
                    last_error = e;
                }
            }
        }
        Err(last_error.into())
    }

    /// Replace all session state with the result of a key exchange.
    fn install(&mut self, outcome: KeOutcome, ntp_address: SocketAddr) {
        let KeOutcome { response, keys } = outcome;
        self.contexts = Some(Contexts {
            c2s: SivCmac256::new(&keys.c2s),
            s2c: SivCmac256::new(&keys.s2c),
        });
        self.cookies.clear();
        self.cookies
            .extend(response.cookies.into_iter().take(MAX_COOKIES));
        self.ntp_address = Some(ntp_address);
        self.pending_id = None;
        debug!(
            %ntp_address,
            cookies = self.cookies.len(),
            "installed NTS session"
        );
    }

    /// Append NTS fields to a client request and authenticate it.
    ///
    /// `packet` must hold the 48-byte NTP header. Spends one cookie; the
    /// unique identifier and nonce are fresh for every call. On error the
    /// packet may hold a partial set of fields and no cookie is spent.
    pub fn generate_request_auth(&mut self, packet: &mut Vec<u8>) -> Result<(), NtsAuthError> {
        let contexts = self.contexts.as_ref().ok_or(NtsAuthError::NoCookies)?;
        let cookie = self.cookies.front().ok_or(NtsAuthError::NoCookies)?;

        let mut unique_id = [0u8; MIN_UNIQUE_ID_LENGTH];
        rand::fill(&mut unique_id);

        extension::add_field(packet, UNIQUE_IDENTIFIER, &unique_id)?;
        extension::add_field(packet, NTS_COOKIE, cookie)?;
        let placeholder = vec![0u8; cookie.len()];
        for _ in self.cookies.len()..MAX_COOKIES {
            extension::add_field(packet, NTS_COOKIE_PLACEHOLDER, &placeholder)?;
        }

        let (nonce, ciphertext) = contexts
            .c2s
            .seal(&packet[..], &[])
            .map_err(NtsAuthError::Seal)?;
        let authenticator = NtsAuthenticator::new(nonce.to_vec(), ciphertext);
        extension::add_field(packet, NTS_AUTHENTICATOR, &authenticator.to_body())?;

        self.cookies.pop_front();
        self.pending_id = Some(unique_id);
        Ok(())
    }

    /// Authenticate a server response and take the cookies it carries.
    ///
    /// The response must echo the identifier of the last request. Once a
    /// response is accepted, later packets echoing the same identifier are
    /// rejected.
    pub fn check_response_auth(&mut self, packet: &[u8]) -> Result<(), NtsAuthError> {
        let fields = extension::packet_fields(packet)?;
        check_header(packet, MODE_SERVER)?;
        let contexts = self.contexts.as_ref().ok_or(NtsAuthError::NoCookies)?;
        let expected = self.pending_id.ok_or(NtsAuthError::UniqueIdMismatch)?;

        let mut unique_id = None;
        let mut located = None;
        for field in fields {
            let field = field?;
            match field.field.field_type {
                UNIQUE_IDENTIFIER if unique_id.is_none() => unique_id = Some(field.field.value),
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
        if unique_id != &expected[..] {
            return Err(NtsAuthError::UniqueIdMismatch);
        }
        let located = located.ok_or(NtsAuthError::MissingField {
            field: "NTS Authenticator",
        })?;

        let plaintext = contexts
            .s2c
            .decrypt(
                &located.authenticator.nonce,
                &packet[..located.offset],
                &located.authenticator.ciphertext,
            )
            .map_err(|_| NtsAuthError::Authentication)?;
        self.pending_id = None;

        for field in extension::iter_extension_fields(&plaintext) {
            let field = field?;
            if field.field_type != NTS_COOKIE {
                continue;
            }
            if field.value.is_empty() || field.value.len() > MAX_COOKIE_LENGTH {
                debug!(length = field.value.len(), "ignoring cookie of unusable length");
                continue;
            }
            if self.cookies.len() < MAX_COOKIES {
                self.cookies.push_back(field.value.to_vec());
            }
        }
        debug!(cookies = self.cookies.len(), "verified NTS response");
        Ok(())
    }

    /// Number of unspent cookies.
    pub fn cookie_count(&self) -> usize {
        self.cookies.len()
    }

    /// NTP server negotiated by the last key exchange.
    pub fn ntp_address(&self) -> Option<SocketAddr> {
        self.ntp_address
    }

    /// Configuration this client was created with.
    pub fn config(&self) -> &NtsClientConfig {
        &self.config
    }
}

/// Pick the NTP server address a key exchange points to.
///
/// Without a Server record the NTP server is the host that answered NTS-KE.
async fn resolve_ntp_address(
    outcome: &KeOutcome,
    ke_addr: SocketAddr,
) -> Result<SocketAddr, NtsKeError> {
    let port = outcome.response.ntp_port.unwrap_or(NTP_DEFAULT_PORT);
    let Some(server) = outcome.response.ntp_server.as_deref() else {
        return Ok(SocketAddr::new(ke_addr.ip(), port));
    };
    let mut addrs = tokio::net::lookup_host((server, port)).await?;
    addrs.next().ok_or_else(|| {
        NtsKeError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("NTP server {server} did not resolve to any address"),
        ))
    })
}
