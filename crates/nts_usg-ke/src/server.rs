// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE server using the Tokio runtime (RFC 8915).
//!
//! [`NtsKeService`] owns the fixed pool of server sessions, the key ring and
//! the responder. [`NtsKeServer`] binds the listening sockets and drives the
//! service from a single task: accepts, per-session readiness, session
//! deadlines and key rotation are all multiplexed with `tokio::select!`, so
//! no two sessions ever run concurrently.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> std::io::Result<()> {
//! use nts_ke::config::NtsKeServerConfig;
//! use nts_ke::cookie::KeyRing;
//! use nts_ke::server::NtsKeServer;
//!
//! // Load your TLS certificate and private key.
//! let cert_pem = std::fs::read("server.crt")?;
//! let key_pem = std::fs::read("server.key")?;
//!
//! let config = NtsKeServerConfig::from_pem(&cert_pem, &key_pem)
//!     .map_err(nts_ke::error::NtsKeError::from)?;
//! let key_ring = KeyRing::shared();
//!
//! // Share `key_ring` with the NTP request handler.
//! let server = NtsKeServer::bind(config, key_ring.clone())?;
//! server.run().await
//! # }
//! ```

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::channel::{Interest, RustlsChannel, TlsChannel};
use crate::config::NtsKeServerConfig;
use crate::cookie::SharedKeyRing;
use crate::error::{ConfigError, NtsKeError};
use crate::exchange::Responder;
use crate::session::ServerSession;
use crate::tls_config;

// ============================================================================
// Service
// ============================================================================

/// The session pool and the state shared by all sessions.
pub struct NtsKeService<T> {
    sessions: Vec<ServerSession<T>>,
    key_ring: SharedKeyRing,
    responder: Responder,
    timeout: Duration,
}

impl<T: TlsChannel> NtsKeService<T> {
    /// Create a service with `max_sessions` idle slots.
    pub fn new(
        key_ring: SharedKeyRing,
        responder: Responder,
        max_sessions: usize,
        timeout: Duration,
    ) -> Self {
        NtsKeService {
            sessions: (0..max_sessions).map(|_| ServerSession::new()).collect(),
            key_ring,
            responder,
            timeout,
        }
    }

    /// Create a service from the server configuration.
    pub fn from_config(config: &NtsKeServerConfig, key_ring: SharedKeyRing) -> Self {
        let responder = Responder::new(
            config.ntp_server.clone(),
            config.ntp_port,
            config.cookie_count,
        );
        NtsKeService::new(
            key_ring,
            responder,
            config.max_sessions,
            config.session_timeout,
        )
    }

    /// Number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.sessions.len()
    }

    /// Number of slots currently serving a connection.
    pub fn active_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| !s.is_closed()).count()
    }

    /// The key ring cookies are minted with.
    pub fn key_ring(&self) -> &SharedKeyRing {
        &self.key_ring
    }

    /// Place an accepted connection in the first free slot.
    ///
    /// Returns `None` and drops (closing) the connection when every slot is busy.
    pub fn accept(&mut self, channel: T, peer: SocketAddr, now: Instant) -> Option<usize> {
        let Some(slot) = self.sessions.iter().position(ServerSession::is_closed) else {
            warn!(peer = %peer, "NTS-KE session pool full, rejecting connection");
            return None;
        };
        self.sessions[slot].open(channel, peer, now, self.timeout);
        Some(slot)
    }

    /// Advance the session in `slot` after a readiness event.
    pub fn on_ready(&mut self, slot: usize, now: Instant) -> Option<Interest> {
        let session = self.sessions.get_mut(slot)?;
        let Ok(ring) = self.key_ring.read() else {
            warn!("server key ring lock poisoned, dropping NTS-KE session");
            session.close();
            return None;
        };
        session.on_ready(&self.responder, &ring, now)
    }

    /// Readiness the session in `slot` waits for.
    pub fn interest(&self, slot: usize) -> Option<Interest> {
        self.sessions.get(slot)?.interest()
    }

    /// The channel of the session in `slot`, while it is open.
    pub fn channel(&self, slot: usize) -> Option<&T> {
        self.sessions.get(slot)?.channel()
    }

    /// Close the session in `slot`.
    pub fn close(&mut self, slot: usize) {
        if let Some(session) = self.sessions.get_mut(slot) {
            session.close();
        }
    }

    /// Close every open session.
    pub fn close_all(&mut self) {
        self.sessions.iter_mut().for_each(ServerSession::close);
    }

    /// Force-close every session whose deadline has passed. Returns how many.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        for session in &mut self.sessions {
            if session.deadline().is_some_and(|deadline| now >= deadline) {
                session.on_timeout();
                expired += 1;
            }
        }
        expired
    }

    /// Earliest deadline among the open sessions.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions.iter().filter_map(ServerSession::deadline).min()
    }

    /// Advance the key ring to a fresh key.
    pub fn rotate_keys(&self) -> Result<(), NtsKeError> {
        let mut ring = self
            .key_ring
            .write()
            .map_err(|_| ConfigError::KeyRingPoisoned)?;
        ring.rotate();
        Ok(())
    }
}

// ============================================================================
// Listener
// ============================================================================

/// An NTS-KE server that accepts TLS connections and issues NTS cookies.
pub struct NtsKeServer {
    listeners: Vec<TcpListener>,
    tls_config: Arc<rustls::ServerConfig>,
    service: NtsKeService<RustlsChannel>,
    rotation_interval: Duration,
}

enum Event {
    Shutdown,
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Ready(usize, io::Result<tokio::io::Ready>),
    Deadline,
    Rotate,
}

impl NtsKeServer {
    /// Bind the wildcard listeners described by `config`.
    ///
    /// Must be called from within a Tokio runtime. Fails only when no
    /// listener at all could be bound.
    pub fn bind(config: NtsKeServerConfig, key_ring: SharedKeyRing) -> io::Result<Self> {
        let service = NtsKeService::from_config(&config, key_ring);
        let backlog = config.max_sessions;
        let mut addrs = vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port))];
        if config.ipv6 {
            addrs.push(SocketAddr::from((Ipv6Addr::UNSPECIFIED, config.port)));
        }

        let mut listeners = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match listen(addr, backlog) {
                Ok(listener) => {
                    info!(addr = %listener.local_addr()?, "NTS-KE server listening");
                    listeners.push(listener);
                }
                Err(e) => warn!(addr = %addr, error = %e, "could not open NTS-KE listener"),
            }
        }
        if listeners.is_empty() {
            return Err(NtsKeError::from(ConfigError::NoListeners { port: config.port }).into());
        }

        let tls_config = tls_config::server_config(config.cert_chain, config.private_key)
            .map_err(NtsKeError::from)?;

        Ok(NtsKeServer {
            listeners,
            tls_config: Arc::new(tls_config),
            service,
            rotation_interval: config.rotation_interval,
        })
    }

    /// Addresses the listeners are bound to.
    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.listeners.iter().map(TcpListener::local_addr).collect()
    }

    /// The key ring shared with the NTP request handler.
    pub fn key_ring(&self) -> SharedKeyRing {
        self.service.key_ring().clone()
    }

    /// Run the NTS-KE server, accepting connections indefinitely.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` completes, then close every session.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let NtsKeServer {
            listeners,
            tls_config,
            mut service,
            rotation_interval,
        } = self;
        tokio::pin!(shutdown);
        let mut rotation = tokio::time::interval_at(
            tokio::time::Instant::now() + rotation_interval,
            rotation_interval,
        );

        loop {
            let event = {
                let mut accepts: FuturesUnordered<_> =
                    listeners.iter().map(|l| l.accept()).collect();
                let mut readiness: FuturesUnordered<_> = (0..service.capacity())
                    .filter_map(|slot| {
                        let interest = service.interest(slot)?;
                        let channel = service.channel(slot)?;
                        Some(async move { (slot, channel.ready(interest).await) })
                    })
                    .collect();
                let deadline = service.next_deadline();

                tokio::select! {
                    _ = &mut shutdown => Event::Shutdown,
                    Some(accepted) = accepts.next() => Event::Accepted(accepted),
                    Some((slot, ready)) = readiness.next() => Event::Ready(slot, ready),
                    _ = sleep_until(deadline) => Event::Deadline,
                    _ = rotation.tick() => Event::Rotate,
                }
            };

            match event {
                Event::Shutdown => {
                    info!(
                        active = service.active_sessions(),
                        "NTS-KE server shutting down"
                    );
                    service.close_all();
                    return Ok(());
                }
                Event::Accepted(Ok((stream, peer))) => {
                    let channel = match RustlsChannel::server(tls_config.clone(), stream) {
                        Ok(channel) => channel,
                        Err(e) => {
                            warn!(peer = %peer, error = %e, "could not create TLS session");
                            continue;
                        }
                    };
                    if let Some(slot) = service.accept(channel, peer, Instant::now()) {
                        debug!(peer = %peer, slot, "accepted NTS-KE connection");
                    }
                }
                Event::Accepted(Err(e)) => {
                    warn!(error = %e, "NTS-KE accept failed");
                }
                Event::Ready(slot, Ok(_)) => {
                    service.on_ready(slot, Instant::now());
                }
                Event::Ready(slot, Err(e)) => {
                    debug!(slot, error = %e, "NTS-KE socket error");
                    service.close(slot);
                }
                Event::Deadline => {
                    service.expire(Instant::now());
                }
                Event::Rotate => {
                    if let Err(e) = service.rotate_keys() {
                        warn!(error = %e, "NTS-KE key rotation failed");
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending().await,
    }
}

fn listen(addr: SocketAddr, backlog: usize) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.try_into().unwrap_or(i32::MAX))?;
    TcpListener::from_std(socket.into())
}
