// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The TLS capability NTS-KE sessions are driven through.
//!
//! Every operation is non-blocking. A result of kind
//! [`io::ErrorKind::WouldBlock`] means "retry on the next readiness event";
//! any other error is fatal for the session.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use socket2::SockRef;
use tokio::net::TcpStream;

use crate::error::{ConfigError, NtsKeError};

/// ALPN identifier for NTS-KE.
pub const NTS_KE_ALPN: &[u8] = b"ntske/1";

/// Exporter label used to derive the NTP session keys (RFC 8915 Section 5.1).
pub const NTS_EXPORTER_LABEL: &[u8] = b"EXPORTER-network-time-security";

/// Exporter context for the client-to-server key: NTPv4, AES-SIV-CMAC-256, C2S.
pub const EXPORTER_CONTEXT_C2S: [u8; 5] = [0x00, 0x00, 0x00, 0x0F, 0x00];

/// Exporter context for the server-to-client key: NTPv4, AES-SIV-CMAC-256, S2C.
pub const EXPORTER_CONTEXT_S2C: [u8; 5] = [0x00, 0x00, 0x00, 0x0F, 0x01];

/// Readiness a session wants to be woken for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interest {
    /// Wake when readable.
    Read,
    /// Wake when writable.
    Write,
    /// Wake when readable or writable.
    ReadWrite,
}

impl From<Interest> for tokio::io::Interest {
    fn from(interest: Interest) -> Self {
        match interest {
            Interest::Read => tokio::io::Interest::READABLE,
            Interest::Write => tokio::io::Interest::WRITABLE,
            Interest::ReadWrite => tokio::io::Interest::READABLE | tokio::io::Interest::WRITABLE,
        }
    }
}

/// A TLS connection over a non-blocking transport.
pub trait TlsChannel {
    /// Advance the handshake. `Ok` once it has completed.
    fn handshake(&mut self) -> io::Result<()>;

    /// Whether the TLS layer has output waiting for the transport.
    fn wants_write(&self) -> bool;

    /// Application protocol selected during the handshake.
    fn alpn_protocol(&self) -> Option<&[u8]>;

    /// Write application data, returning how much was accepted.
    ///
    /// An empty `data` only flushes output already buffered by the TLS layer.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read application data. `Ok(0)` means the peer closed the stream.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether decrypted data is buffered and can be read without more input.
    fn has_pending(&mut self) -> bool;

    /// Send a close notification and wait for the peer's.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Shut down both directions of the underlying transport.
    fn shutdown_transport(&mut self) -> io::Result<()>;

    /// Derive 32 bytes of keying material bound to `context`.
    fn export_key(&self, context: &[u8], out: &mut [u8; 32]) -> io::Result<()>;

    /// Address of the remote end.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

/// Adapts the non-blocking `try_read`/`try_write` calls to `Read`/`Write`.
struct SocketIo<'a>(&'a TcpStream);

impl Read for SocketIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for SocketIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn tls_error(err: rustls::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// [`TlsChannel`] backed by rustls over a tokio TCP stream.
pub struct RustlsChannel {
    conn: rustls::Connection,
    sock: TcpStream,
    close_sent: bool,
}

impl RustlsChannel {
    /// Wrap an accepted connection in a server-side TLS session.
    pub fn server(config: Arc<rustls::ServerConfig>, sock: TcpStream) -> io::Result<Self> {
        let conn = rustls::ServerConnection::new(config).map_err(tls_error)?;
        Ok(RustlsChannel {
            conn: conn.into(),
            sock,
            close_sent: false,
        })
    }

    /// Wrap a connected stream in a client-side TLS session for `server_name`.
    pub fn client(
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
        sock: TcpStream,
    ) -> Result<Self, NtsKeError> {
        let name = ServerName::try_from(server_name.to_owned()).map_err(|_| {
            ConfigError::InvalidServerName {
                name: server_name.to_owned(),
            }
        })?;
        let conn = rustls::ClientConnection::new(config, name).map_err(tls_error)?;
        Ok(RustlsChannel {
            conn: conn.into(),
            sock,
            close_sent: false,
        })
    }

    /// Wait until the transport is ready for `interest`.
    pub async fn ready(&self, interest: Interest) -> io::Result<tokio::io::Ready> {
        self.sock.ready(interest.into()).await
    }

    fn flush_tls(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut SocketIo(&self.sock))?;
        }
        Ok(())
    }

    /// Pull TLS records from the transport. `Ok(0)` means transport EOF.
    fn fill_tls(&mut self) -> io::Result<usize> {
        let n = self.conn.read_tls(&mut SocketIo(&self.sock))?;
        if let Err(e) = self.conn.process_new_packets() {
            // Best effort to deliver the alert rustls queued for the peer.
            let _ = self.flush_tls();
            return Err(tls_error(e));
        }
        Ok(n)
    }
}

impl TlsChannel for RustlsChannel {
    fn handshake(&mut self) -> io::Result<()> {
        loop {
            self.flush_tls()?;
            if !self.conn.is_handshaking() {
                return Ok(());
            }
            if self.fill_tls()? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during TLS handshake",
                ));
            }
        }
    }

    fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    fn alpn_protocol(&self) -> Option<&[u8]> {
        self.conn.alpn_protocol()
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let accepted = if data.is_empty() {
            0
        } else {
            self.conn.writer().write(data)?
        };
        match self.flush_tls() {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && accepted > 0 => Ok(accepted),
            Err(e) => Err(e),
            Ok(()) if accepted == 0 && !data.is_empty() => Err(io::ErrorKind::WouldBlock.into()),
            Ok(()) => Ok(accepted),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                // Transport closed without close_notify.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            self.fill_tls()?;
        }
    }

    fn has_pending(&mut self) -> bool {
        self.conn
            .process_new_packets()
            .map(|state| state.plaintext_bytes_to_read() > 0)
            .unwrap_or(false)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        if !self.close_sent {
            self.conn.send_close_notify();
            self.close_sent = true;
        }
        self.flush_tls()?;

        let mut discard = [0u8; 512];
        loop {
            match self.conn.reader().read(&mut discard) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            self.fill_tls()?;
        }
    }

    fn shutdown_transport(&mut self) -> io::Result<()> {
        SockRef::from(&self.sock).shutdown(Shutdown::Both)
    }

    fn export_key(&self, context: &[u8], out: &mut [u8; 32]) -> io::Result<()> {
        self.conn
            .export_keying_material(&mut out[..], NTS_EXPORTER_LABEL, Some(context))
            .map(|_| ())
            .map_err(|e| io::Error::other(format!("TLS key export failed: {e}")))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.sock.peer_addr()
    }
}
