// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

// TLS configuration for NTS key establishment.
//
// Selects the cryptographic provider based on feature flags:
// - `pq-nts`: aws-lc-rs with X25519MLKEM768 preferred
// - without `pq-nts`: ring with classical X25519 only

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pki_types::pem::PemObject;

use crate::channel::NTS_KE_ALPN;
use crate::error::ConfigError;

/// Build the TLS crypto provider for the current feature configuration.
fn crypto_provider() -> rustls::crypto::CryptoProvider {
    #[cfg(feature = "pq-nts")]
    {
        rustls::crypto::aws_lc_rs::default_provider()
    }
    #[cfg(not(feature = "pq-nts"))]
    {
        rustls::crypto::ring::default_provider()
    }
}

fn invalid_credentials(detail: impl ToString) -> ConfigError {
    ConfigError::InvalidTlsCredentials {
        detail: detail.to_string(),
    }
}

/// Build a TLS server configuration for NTS-KE (RFC 8915, TLS 1.3 only).
pub fn server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
) -> Result<rustls::ServerConfig, ConfigError> {
    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(crypto_provider()))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(invalid_credentials)?
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(invalid_credentials)?;
    config.alpn_protocols = vec![NTS_KE_ALPN.to_vec()];
    Ok(config)
}

/// Build a TLS client configuration for NTS-KE.
///
/// Trusts the WebPKI roots plus any certificates in `extra_ca_pem`, which is
/// how private deployments and tests pin a self-signed server.
pub fn client_config(extra_ca_pem: Option<&[u8]>) -> Result<rustls::ClientConfig, ConfigError> {
    let mut root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(pem) = extra_ca_pem {
        for cert in CertificateDer::pem_slice_iter(pem) {
            root_store
                .add(cert.map_err(invalid_credentials)?)
                .map_err(invalid_credentials)?;
        }
    }

    let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(crypto_provider()))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(invalid_credentials)?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![NTS_KE_ALPN.to_vec()];
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>, String) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let pem = cert.cert.pem();
        let certs = CertificateDer::pem_slice_iter(pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let key = PrivateKeyDer::from_pem_slice(cert.key_pair.serialize_pem().as_bytes()).unwrap();
        (certs, key, pem)
    }

    #[test]
    fn test_server_config_sets_alpn() {
        let (certs, key, _) = self_signed();
        let config = server_config(certs, key).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"ntske/1".to_vec()]);
    }

    #[test]
    fn test_client_config_accepts_extra_root() {
        let (_, _, pem) = self_signed();
        let config = client_config(Some(pem.as_bytes())).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"ntske/1".to_vec()]);
    }

    #[test]
    fn test_client_config_rejects_garbage_root() {
        let pem = b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(matches!(
            client_config(Some(pem)),
            Err(ConfigError::InvalidTlsCredentials { .. })
        ));
    }
}
