//-
// Copyright (c) 2026, The Mallard Authors
//
// This file is part of Mallard.
//
// Mallard is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mallard is distributed  in the hope that it  will be useful,  but WITHOUT
// ANY  WARRANTY;  without  even  the implied  warranty of  MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Mallard. If not, see <http://www.gnu.org/licenses/>.

use std::io::{self, Read, Write};
use std::mem;
use std::net::TcpStream;
use std::time::Duration;

use openssl::ssl::{SslAcceptor, SslStream};

use super::error::Error;

/// The transport a protocol session runs over.
///
/// Sessions are single-threaded and never read and write simultaneously, so
/// one object carries both directions. `start_tls` upgrades the transport in
/// place; the caller is responsible for resetting its line scanner
/// afterwards.
pub trait SessionStream: Read + Write + Send {
    fn start_tls(&mut self, acceptor: &SslAcceptor) -> Result<(), Error>;
    fn set_read_timeout(&mut self, timeout: Option<Duration>)
        -> io::Result<()>;
    fn set_write_timeout(&mut self, timeout: Option<Duration>)
        -> io::Result<()>;
}

/// A TCP connection, optionally TLS-wrapped.
pub struct TcpTransport(Inner);

enum Inner {
    Plain(TcpStream),
    Tls(SslStream<TcpStream>),
    /// Transient state while the TLS handshake is in progress. Observable
    /// only if the handshake panics.
    Handshaking,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport(Inner::Plain(stream))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.0, Inner::Tls(..))
    }

    fn tcp(&self) -> io::Result<&TcpStream> {
        match self.0 {
            Inner::Plain(ref s) => Ok(s),
            Inner::Tls(ref s) => Ok(s.get_ref()),
            Inner::Handshaking => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport mid-handshake",
            )),
        }
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0 {
            Inner::Plain(ref mut s) => s.read(buf),
            Inner::Tls(ref mut s) => s.read(buf),
            Inner::Handshaking => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport mid-handshake",
            )),
        }
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0 {
            Inner::Plain(ref mut s) => s.write(buf),
            Inner::Tls(ref mut s) => s.write(buf),
            Inner::Handshaking => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport mid-handshake",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0 {
            Inner::Plain(ref mut s) => s.flush(),
            Inner::Tls(ref mut s) => s.flush(),
            Inner::Handshaking => Ok(()),
        }
    }
}

impl SessionStream for TcpTransport {
    fn start_tls(&mut self, acceptor: &SslAcceptor) -> Result<(), Error> {
        match mem::replace(&mut self.0, Inner::Handshaking) {
            Inner::Plain(stream) => match acceptor.accept(stream) {
                Ok(tls) => {
                    self.0 = Inner::Tls(tls);
                    Ok(())
                },
                Err(e) => Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    format!("TLS handshake failed: {}", e),
                ))),
            },
            other => {
                self.0 = other;
                Err(Error::TlsNotAvailable)
            },
        }
    }

    fn set_read_timeout(
        &mut self,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        self.tcp()?.set_read_timeout(timeout)
    }

    fn set_write_timeout(
        &mut self,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        self.tcp()?.set_write_timeout(timeout)
    }
}

/// True if an I/O error is a read-timeout tick rather than a dead
/// connection. Both kinds occur in the wild depending on platform.
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
