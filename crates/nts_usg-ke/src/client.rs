// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE client connector.
//!
//! [`NtsKeConnector::exchange`] runs one [`ClientSession`] over a real TCP
//! connection: it waits for the connect, then for each readiness the session
//! asks for, until the session closes or its deadline passes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::debug;

use crate::channel::RustlsChannel;
use crate::config::DEFAULT_SESSION_TIMEOUT;
use crate::error::NtsKeError;
use crate::session::{ClientSession, KeOutcome};

/// Opens NTS-KE sessions to servers.
#[derive(Clone)]
pub struct NtsKeConnector {
    tls_config: Arc<rustls::ClientConfig>,
    timeout: Duration,
}

impl NtsKeConnector {
    /// Create a connector with the default two second session timeout.
    pub fn new(tls_config: Arc<rustls::ClientConfig>) -> Self {
        NtsKeConnector {
            tls_config,
            timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    /// Override the session timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Session timeout covering connect, handshake and exchange.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one key exchange with the server at `addr`, verified as `server_name`.
    pub async fn exchange(
        &self,
        addr: SocketAddr,
        server_name: &str,
    ) -> Result<KeOutcome, NtsKeError> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + self.timeout);
        let mut session = ClientSession::new(server_name);
        session.start(addr, start, self.timeout);

        let connected = match tokio::time::timeout_at(deadline, TcpStream::connect(addr)).await {
            Err(_) => {
                session.on_timeout();
                return session.into_outcome();
            }
            Ok(Ok(stream)) => Ok(RustlsChannel::client(
                self.tls_config.clone(),
                server_name,
                stream,
            )?),
            Ok(Err(e)) => Err(e),
        };

        let mut interest = session.on_connected(connected);
        while let Some(wanted) = interest {
            let Some(channel) = session.channel() else {
                break;
            };
            interest = match tokio::time::timeout_at(deadline, channel.ready(wanted)).await {
                Err(_) => {
                    session.on_timeout();
                    None
                }
                Ok(Err(e)) => {
                    session.abort(e);
                    None
                }
                Ok(Ok(_)) => session.on_ready(Instant::now()),
            };
        }

        let outcome = session.into_outcome();
        match &outcome {
            Ok(outcome) => debug!(
                server = server_name,
                cookies = outcome.response.cookies.len(),
                "NTS-KE exchange complete"
            ),
            Err(e) => debug!(server = server_name, error = %e, "NTS-KE exchange failed"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::tls_config::client_config;
    use std::io;

    fn connector(timeout: Duration) -> NtsKeConnector {
        NtsKeConnector::new(Arc::new(client_config(None).unwrap())).with_timeout(timeout)
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        match connector(Duration::from_secs(2)).exchange(addr, "localhost").await {
            Err(NtsKeError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Completes the TCP handshake in the kernel but never speaks TLS.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let started = Instant::now();
        let result = connector(Duration::from_millis(200))
            .exchange(addr, "localhost")
            .await;
        match result {
            Err(NtsKeError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(listener);
    }

    #[tokio::test]
    async fn test_invalid_server_name() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let result = connector(Duration::from_secs(1))
            .exchange(addr, "not a hostname!")
            .await;
        assert!(matches!(
            result,
            Err(NtsKeError::Config(ConfigError::InvalidServerName { .. }))
        ));
    }
}
