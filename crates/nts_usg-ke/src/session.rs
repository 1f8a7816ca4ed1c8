// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE session state machines.
//!
//! A session never blocks. Each readiness event runs the current state until
//! it either completes (and the next state is entered immediately) or reports
//! that it has to wait. After every event the session reports which
//! readiness it wants next, or `None` once it is closed.
//!
//! ```text
//! server:            Handshake -> Receive -> Send -> Shutdown -> Closed
//! client: WaitConnect -> Handshake -> Send -> Receive -> Shutdown -> Closed
//! ```
//!
//! Any fatal error, or the inactivity deadline passing, closes the session
//! from whatever state it is in. Closing is idempotent.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::channel::{
    Interest, TlsChannel, EXPORTER_CONTEXT_C2S, EXPORTER_CONTEXT_S2C, NTS_KE_ALPN,
};
use crate::cookie::{KeyRing, SessionKeys};
use crate::error::{NtsKeError, ProtocolError};
use crate::exchange::{self, KeResponse, Responder};
use nts_proto::record::{Message, MessageFormat};

/// Result of running one state as far as it can go.
#[derive(Debug)]
enum Pump {
    Done,
    Wait,
    Fail(NtsKeError),
}

#[derive(Debug)]
enum Transition<S> {
    Stay,
    Enter(S),
    Close,
}

fn is_would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// Export both NTP keys from a completed TLS session.
pub fn export_session_keys<T: TlsChannel>(channel: &T) -> io::Result<SessionKeys> {
    let mut keys = SessionKeys {
        c2s: [0u8; 32],
        s2c: [0u8; 32],
    };
    channel.export_key(&EXPORTER_CONTEXT_C2S, &mut keys.c2s)?;
    channel.export_key(&EXPORTER_CONTEXT_S2C, &mut keys.s2c)?;
    Ok(keys)
}

// ============================================================================
// Shared connection plumbing
// ============================================================================

/// The parts of a session both modes share.
#[derive(Debug)]
struct Link<T> {
    channel: Option<T>,
    message: Message,
    deadline: Option<Instant>,
    peer: Option<SocketAddr>,
}

impl<T: TlsChannel> Link<T> {
    fn new() -> Self {
        Link {
            channel: None,
            message: Message::new(),
            deadline: None,
            peer: None,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    fn handshake(&mut self) -> Pump {
        let Some(channel) = self.channel.as_mut() else {
            return Pump::Fail(io::Error::from(io::ErrorKind::NotConnected).into());
        };
        match channel.handshake() {
            Ok(()) => {}
            Err(e) if is_would_block(&e) => return Pump::Wait,
            Err(e) => return Pump::Fail(e.into()),
        }
        if channel.alpn_protocol() != Some(NTS_KE_ALPN) {
            return Pump::Fail(
                io::Error::new(io::ErrorKind::InvalidData, "NTS-KE ALPN not negotiated").into(),
            );
        }
        Pump::Done
    }

    fn send(&mut self) -> Pump {
        let Some(channel) = self.channel.as_mut() else {
            return Pump::Fail(io::Error::from(io::ErrorKind::NotConnected).into());
        };
        loop {
            if self.message.is_sent() && !channel.wants_write() {
                return Pump::Done;
            }
            match channel.send(self.message.unsent()) {
                Ok(n) => self.message.mark_sent(n),
                Err(e) if is_would_block(&e) => return Pump::Wait,
                Err(e) => return Pump::Fail(e.into()),
            }
        }
    }

    fn receive(&mut self) -> Pump {
        let Some(channel) = self.channel.as_mut() else {
            return Pump::Fail(io::Error::from(io::ErrorKind::NotConnected).into());
        };
        loop {
            match self.message.receive_with(|buf| channel.recv(buf)) {
                Ok(_) => {}
                Err(e) if is_would_block(&e) => return Pump::Wait,
                Err(e) => return Pump::Fail(e.into()),
            }
            match self.message.validate() {
                MessageFormat::Ok => return Pump::Done,
                MessageFormat::Malformed if self.message.eof() => {
                    return Pump::Fail(ProtocolError::IncompleteResponse.into());
                }
                MessageFormat::Malformed => {
                    return Pump::Fail(
                        io::Error::new(io::ErrorKind::InvalidData, "malformed NTS-KE message")
                            .into(),
                    );
                }
                MessageFormat::Incomplete if channel.has_pending() => {}
                MessageFormat::Incomplete => return Pump::Wait,
            }
        }
    }

    fn shutdown(&mut self) -> Pump {
        let Some(channel) = self.channel.as_mut() else {
            return Pump::Done;
        };
        match channel.shutdown() {
            Ok(()) => {}
            Err(e) if is_would_block(&e) => return Pump::Wait,
            Err(e) => return Pump::Fail(e.into()),
        }
        if let Err(e) = channel.shutdown_transport() {
            debug!(error = %e, "transport shutdown failed");
        }
        Pump::Done
    }

    fn export_keys(&self) -> Result<SessionKeys, NtsKeError> {
        match &self.channel {
            Some(channel) => Ok(export_session_keys(channel)?),
            None => Err(io::Error::from(io::ErrorKind::NotConnected).into()),
        }
    }

    /// Interest of a state that may have TLS output pending.
    fn tls_interest(&self) -> Interest {
        match &self.channel {
            Some(channel) if channel.wants_write() => Interest::ReadWrite,
            _ => Interest::Read,
        }
    }

    fn release(&mut self) {
        self.channel = None;
        self.deadline = None;
        self.message.clear();
    }
}

// ============================================================================
// Server session
// ============================================================================

/// States of a server-side session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerState {
    /// Idle pool slot, or finished.
    Closed,
    /// Driving the TLS handshake.
    Handshake,
    /// Reading the request.
    Receive,
    /// Writing the response.
    Send,
    /// Exchanging close notifications.
    Shutdown,
}

/// One server-side NTS-KE connection.
#[derive(Debug)]
pub struct ServerSession<T> {
    state: ServerState,
    link: Link<T>,
}

impl<T: TlsChannel> Default for ServerSession<T> {
    fn default() -> Self {
        ServerSession::new()
    }
}

impl<T: TlsChannel> ServerSession<T> {
    /// Create a closed session.
    pub fn new() -> Self {
        ServerSession {
            state: ServerState::Closed,
            link: Link::new(),
        }
    }

    /// Take ownership of an accepted connection and start the handshake.
    pub fn open(&mut self, channel: T, peer: SocketAddr, now: Instant, timeout: Duration) {
        self.close();
        self.link.channel = Some(channel);
        self.link.peer = Some(peer);
        self.link.deadline = Some(now + timeout);
        self.state = ServerState::Handshake;
        debug!(peer = %peer, "NTS-KE session opened");
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// True when the slot is free.
    pub fn is_closed(&self) -> bool {
        self.state == ServerState::Closed
    }

    /// Address of the client, kept after close for logging.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.link.peer
    }

    /// Instant at which the session is force-closed.
    pub fn deadline(&self) -> Option<Instant> {
        self.link.deadline
    }

    /// The underlying channel while the session is open.
    pub fn channel(&self) -> Option<&T> {
        self.link.channel.as_ref()
    }

    /// Readiness the session waits for, `None` when closed.
    pub fn interest(&self) -> Option<Interest> {
        match self.state {
            ServerState::Closed => None,
            ServerState::Handshake | ServerState::Shutdown => Some(self.link.tls_interest()),
            ServerState::Receive => Some(Interest::Read),
            ServerState::Send => Some(Interest::Write),
        }
    }

    /// Advance the session after a readiness event.
    pub fn on_ready(
        &mut self,
        responder: &Responder,
        ring: &KeyRing,
        now: Instant,
    ) -> Option<Interest> {
        if self.link.expired(now) {
            self.on_timeout();
            return None;
        }

        loop {
            let transition = match self.state {
                ServerState::Closed => break,
                ServerState::Handshake => self.step(ServerState::Receive, Link::handshake),
                ServerState::Receive => self.respond(responder, ring),
                ServerState::Send => self.step(ServerState::Shutdown, Link::send),
                ServerState::Shutdown => match self.link.shutdown() {
                    Pump::Wait => Transition::Stay,
                    Pump::Done => Transition::Close,
                    Pump::Fail(e) => self.fail(e),
                },
            };
            match transition {
                Transition::Stay => break,
                Transition::Enter(next) => {
                    debug!(peer = ?self.link.peer, state = ?next, "NTS-KE session");
                    self.state = next;
                }
                Transition::Close => {
                    self.close();
                    break;
                }
            }
        }
        self.interest()
    }

    fn step(
        &mut self,
        next: ServerState,
        pump: fn(&mut Link<T>) -> Pump,
    ) -> Transition<ServerState> {
        match pump(&mut self.link) {
            Pump::Done => Transition::Enter(next),
            Pump::Wait => Transition::Stay,
            Pump::Fail(e) => self.fail(e),
        }
    }

    fn respond(&mut self, responder: &Responder, ring: &KeyRing) -> Transition<ServerState> {
        match self.link.receive() {
            Pump::Done => {}
            Pump::Wait => return Transition::Stay,
            Pump::Fail(e) => return self.fail(e),
        }

        let verdict = exchange::parse_request(&self.link.message);
        let keys = match verdict {
            Ok(negotiated) if negotiated.is_complete() => match self.link.export_keys() {
                Ok(keys) => Some(keys),
                Err(e) => return self.fail(e),
            },
            _ => None,
        };
        if let Err(e) =
            responder.write_response(verdict, keys.as_ref(), ring, &mut self.link.message)
        {
            return self.fail(e.into());
        }
        Transition::Enter(ServerState::Send)
    }

    fn fail(&self, err: NtsKeError) -> Transition<ServerState> {
        debug!(
            peer = ?self.link.peer,
            state = ?self.state,
            error = %err,
            "NTS-KE session failed"
        );
        Transition::Close
    }

    /// Force-close because the inactivity deadline passed.
    pub fn on_timeout(&mut self) {
        if self.state != ServerState::Closed {
            debug!(peer = ?self.link.peer, state = ?self.state, "NTS-KE session timed out");
            self.close();
        }
    }

    /// Release the connection and return to the idle state. Idempotent.
    pub fn close(&mut self) {
        if self.state == ServerState::Closed {
            return;
        }
        self.link.release();
        self.state = ServerState::Closed;
        debug!(peer = ?self.link.peer, "NTS-KE session closed");
    }
}

// ============================================================================
// Client session
// ============================================================================

/// States of a client-side session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientState {
    /// Not started, or finished.
    Closed,
    /// Waiting for the TCP connect to complete.
    WaitConnect,
    /// Driving the TLS handshake.
    Handshake,
    /// Writing the request.
    Send,
    /// Reading the response.
    Receive,
    /// Exchanging close notifications.
    Shutdown,
}

/// What a completed client exchange produced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeOutcome {
    /// Negotiated parameters and cookies.
    pub response: KeResponse,
    /// Keys exported from the TLS session the cookies are bound to.
    pub keys: SessionKeys,
}

/// One client-side NTS-KE exchange.
#[derive(Debug)]
pub struct ClientSession<T> {
    state: ClientState,
    server_name: String,
    link: Link<T>,
    response: Option<Message>,
    keys: Option<SessionKeys>,
    failure: Option<NtsKeError>,
}

impl<T: TlsChannel> ClientSession<T> {
    /// Create an idle session that will verify the server as `server_name`.
    pub fn new(server_name: impl Into<String>) -> Self {
        ClientSession {
            state: ClientState::Closed,
            server_name: server_name.into(),
            link: Link::new(),
            response: None,
            keys: None,
            failure: None,
        }
    }

    /// Name the server certificate is verified against.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Record that a connect to `addr` was issued.
    pub fn start(&mut self, addr: SocketAddr, now: Instant, timeout: Duration) {
        self.close();
        self.response = None;
        self.keys = None;
        self.failure = None;
        self.link.peer = Some(addr);
        self.link.deadline = Some(now + timeout);
        self.state = ClientState::WaitConnect;
        debug!(server = %self.server_name, addr = %addr, "NTS-KE connecting");
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// True before start and after completion.
    pub fn is_closed(&self) -> bool {
        self.state == ClientState::Closed
    }

    /// Address of the server.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.link.peer
    }

    /// Instant at which the session is force-closed.
    pub fn deadline(&self) -> Option<Instant> {
        self.link.deadline
    }

    /// The underlying channel while the session is open.
    pub fn channel(&self) -> Option<&T> {
        self.link.channel.as_ref()
    }

    /// Readiness the session waits for, `None` when closed.
    pub fn interest(&self) -> Option<Interest> {
        match self.state {
            ClientState::Closed => None,
            ClientState::WaitConnect | ClientState::Send => Some(Interest::Write),
            ClientState::Handshake | ClientState::Shutdown => Some(self.link.tls_interest()),
            ClientState::Receive => Some(Interest::Read),
        }
    }

    /// Hand over the connected transport, or the connect error.
    pub fn on_connected(&mut self, result: io::Result<T>) -> Option<Interest> {
        if self.state != ClientState::WaitConnect {
            return self.interest();
        }
        match result {
            Ok(channel) => {
                if let Ok(addr) = channel.peer_addr() {
                    self.link.peer = Some(addr);
                }
                self.link.channel = Some(channel);
                self.state = ClientState::Handshake;
            }
            Err(e) => {
                debug!(server = %self.server_name, error = %e, "NTS-KE connect failed");
                self.failure = Some(e.into());
                self.close();
            }
        }
        self.interest()
    }

    /// Advance the session after a readiness event.
    pub fn on_ready(&mut self, now: Instant) -> Option<Interest> {
        if self.link.expired(now) {
            self.on_timeout();
            return None;
        }

        loop {
            let transition = match self.state {
                ClientState::Closed | ClientState::WaitConnect => break,
                ClientState::Handshake => match self.link.handshake() {
                    Pump::Done => match exchange::build_request(&mut self.link.message) {
                        Ok(()) => Transition::Enter(ClientState::Send),
                        Err(e) => self.fail(e.into()),
                    },
                    Pump::Wait => Transition::Stay,
                    Pump::Fail(e) => self.fail(e),
                },
                ClientState::Send => match self.link.send() {
                    Pump::Done => {
                        self.link.message.clear();
                        Transition::Enter(ClientState::Receive)
                    }
                    Pump::Wait => Transition::Stay,
                    Pump::Fail(e) => self.fail(e),
                },
                ClientState::Receive => match self.link.receive() {
                    Pump::Done => match self.link.export_keys() {
                        Ok(keys) => {
                            self.keys = Some(keys);
                            self.response = Some(self.link.message.clone());
                            Transition::Enter(ClientState::Shutdown)
                        }
                        Err(e) => self.fail(e),
                    },
                    Pump::Wait => Transition::Stay,
                    Pump::Fail(e) => self.fail(e),
                },
                ClientState::Shutdown => match self.link.shutdown() {
                    Pump::Done => Transition::Close,
                    Pump::Wait => Transition::Stay,
                    Pump::Fail(e) => {
                        // The response is already complete.
                        debug!(server = %self.server_name, error = %e, "NTS-KE shutdown failed");
                        Transition::Close
                    }
                },
            };
            match transition {
                Transition::Stay => break,
                Transition::Enter(next) => {
                    debug!(server = %self.server_name, state = ?next, "NTS-KE session");
                    self.state = next;
                }
                Transition::Close => {
                    self.close();
                    break;
                }
            }
        }
        self.interest()
    }

    fn fail(&mut self, err: NtsKeError) -> Transition<ClientState> {
        debug!(
            server = %self.server_name,
            state = ?self.state,
            error = %err,
            "NTS-KE session failed"
        );
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        Transition::Close
    }

    /// Close after a transport fault reported outside the channel.
    pub fn abort(&mut self, err: io::Error) {
        if self.state == ClientState::Closed {
            return;
        }
        let _ = self.fail(err.into());
        self.close();
    }

    /// Force-close because the inactivity deadline passed.
    pub fn on_timeout(&mut self) {
        if self.state == ClientState::Closed {
            return;
        }
        debug!(server = %self.server_name, state = ?self.state, "NTS-KE session timed out");
        if self.response.is_none() && self.failure.is_none() {
            self.failure = Some(
                io::Error::new(io::ErrorKind::TimedOut, "NTS-KE session timed out").into(),
            );
        }
        self.close();
    }

    /// Release the connection. Idempotent; a received response is kept.
    pub fn close(&mut self) {
        if self.state == ClientState::Closed {
            return;
        }
        self.link.release();
        self.state = ClientState::Closed;
    }

    /// Keys exported once the response was received.
    pub fn keys(&self) -> Option<&SessionKeys> {
        self.keys.as_ref()
    }

    /// Parse the received response.
    pub fn response(&self) -> Result<KeResponse, NtsKeError> {
        match &self.response {
            Some(message) => Ok(exchange::parse_response(message)?),
            None => Err(ProtocolError::IncompleteResponse.into()),
        }
    }

    /// Consume the finished session and return its result.
    pub fn into_outcome(mut self) -> Result<KeOutcome, NtsKeError> {
        if !self.is_closed() {
            let running = io::Error::new(io::ErrorKind::WouldBlock, "NTS-KE session still running");
            return Err(running.into());
        }
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        let response = self.response()?;
        let keys = self.keys.take().ok_or(ProtocolError::IncompleteResponse)?;
        Ok(KeOutcome { response, keys })
    }
}
