// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Shared test helpers for NTS-KE integration tests.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use nts_ke::client::NtsKeConnector;
use nts_ke::config::NtsKeServerConfig;
use nts_ke::cookie::{KeyRing, SharedKeyRing};
use nts_ke::server::NtsKeServer;
use nts_ke::tls_config::client_config;
use tokio::sync::oneshot;

/// Route `tracing` output to the test harness, filtered by `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A self-signed certificate for `localhost`.
pub(crate) struct TestPki {
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestPki {
    pub(crate) fn generate() -> Self {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .expect("failed to generate certificate");
        TestPki {
            cert_pem: cert.cert.pem(),
            key_pem: cert.key_pair.serialize_pem(),
        }
    }

    /// Client TLS configuration trusting this certificate.
    pub(crate) fn client_tls(&self) -> Arc<rustls::ClientConfig> {
        Arc::new(client_config(Some(self.cert_pem.as_bytes())).expect("client config"))
    }

    /// Connector trusting this certificate.
    #[allow(dead_code)]
    pub(crate) fn connector(&self) -> NtsKeConnector {
        NtsKeConnector::new(self.client_tls())
    }
}

/// A server running in a background task.
pub(crate) struct TestServer {
    pub addr: SocketAddr,
    pub key_ring: SharedKeyRing,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    /// Stop the server and return what `run_until` returned.
    #[allow(dead_code)]
    pub(crate) async fn stop(mut self) -> std::io::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.task).await.expect("server task panicked")
    }
}

/// Spawn a server on an ephemeral IPv4 loopback-reachable port.
pub(crate) async fn spawn_test_server(
    pki: &TestPki,
    configure: impl FnOnce(&mut NtsKeServerConfig),
) -> TestServer {
    init_tracing();
    let mut config = NtsKeServerConfig::from_pem(pki.cert_pem.as_bytes(), pki.key_pem.as_bytes())
        .expect("failed to parse PEM");
    config.port = 0;
    config.ipv6 = false;
    configure(&mut config);

    let key_ring = KeyRing::shared();
    let server = NtsKeServer::bind(config, key_ring.clone()).expect("failed to bind test server");
    let port = server.local_addrs().expect("local addrs")[0].port();
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));
    // Small yield to ensure the server task is running.
    tokio::time::sleep(Duration::from_millis(10)).await;

    TestServer {
        addr,
        key_ring,
        shutdown: Some(tx),
        task,
    }
}
