// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for NTS-for-NTP integration tests.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use nts_ke::config::NtsKeServerConfig;
use nts_ke::cookie::{KeyRing, SharedKeyRing};
use nts_ke::server::NtsKeServer;
use nts_ke::tls_config::client_config;
use nts_ntp::client::{NtsClient, NtsClientConfig};
use tokio::sync::oneshot;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An NTS-KE server on an ephemeral loopback port, with its key ring.
pub(crate) struct KeServer {
    pub addr: SocketAddr,
    pub key_ring: SharedKeyRing,
    pub cert_pem: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for KeServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl KeServer {
    /// Client for this server, trusting its self-signed certificate.
    pub(crate) fn client(&self) -> NtsClient {
        let tls = client_config(Some(self.cert_pem.as_bytes())).expect("client config");
        let mut config = NtsClientConfig::new("localhost", Arc::new(tls));
        config.port = self.addr.port();
        NtsClient::new(config)
    }
}

pub(crate) async fn spawn_ke_server(configure: impl FnOnce(&mut NtsKeServerConfig)) -> KeServer {
    init_tracing();
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
        .expect("failed to generate certificate");
    let cert_pem = cert.cert.pem();
    let key_pem = cert.key_pair.serialize_pem();

    let mut config = NtsKeServerConfig::from_pem(cert_pem.as_bytes(), key_pem.as_bytes())
        .expect("failed to parse PEM");
    config.port = 0;
    config.ipv6 = false;
    configure(&mut config);

    let key_ring = KeyRing::shared();
    let server = NtsKeServer::bind(config, key_ring.clone()).expect("failed to bind");
    let port = server.local_addrs().expect("local addrs")[0].port();

    let (tx, rx) = oneshot::channel();
    tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));
    tokio::time::sleep(Duration::from_millis(10)).await;

    KeServer {
        addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        key_ring,
        cert_pem,
        shutdown: Some(tx),
    }
}
