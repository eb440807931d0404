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

//! An in-memory, blocking, bidirectional byte pipe.
//!
//! The integration tests run real protocol sessions in a server thread with
//! the test acting as the client on the other end, the way a socket pair
//! would be used in production.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use openssl::ssl::SslAcceptor;

use super::error::Error;
use super::net::SessionStream;

#[derive(Default)]
struct Channel {
    data: VecDeque<u8>,
    closed: bool,
}

type Shared = Arc<(Mutex<Channel>, Condvar)>;

pub struct DuplexStream {
    read_from: Shared,
    write_to: Shared,
    read_timeout: Option<Duration>,
}

/// Creates a connected pair of streams.
pub fn pair() -> (DuplexStream, DuplexStream) {
    let a: Shared = Default::default();
    let b: Shared = Default::default();
    (
        DuplexStream {
            read_from: Arc::clone(&a),
            write_to: Arc::clone(&b),
            read_timeout: None,
        },
        DuplexStream {
            read_from: b,
            write_to: a,
            read_timeout: None,
        },
    )
}

impl Read for DuplexStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (lock, cond) = &*self.read_from;
        let mut chan = lock.lock().unwrap();

        loop {
            if !chan.data.is_empty() {
                let n = buf.len().min(chan.data.len());
                for slot in buf[..n].iter_mut() {
                    *slot = chan.data.pop_front().unwrap();
                }
                return Ok(n);
            }

            if chan.closed {
                return Ok(0);
            }

            chan = match self.read_timeout {
                None => cond.wait(chan).unwrap(),
                Some(timeout) => {
                    let (guard, result) =
                        cond.wait_timeout(chan, timeout).unwrap();
                    if result.timed_out()
                        && guard.data.is_empty()
                        && !guard.closed
                    {
                        return Err(io::Error::new(
                            io::ErrorKind::WouldBlock,
                            "read timed out",
                        ));
                    }
                    guard
                },
            };
        }
    }
}

impl Write for DuplexStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (lock, cond) = &*self.write_to;
        let mut chan = lock.lock().unwrap();
        if chan.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer closed",
            ));
        }

        chan.data.extend(buf.iter().copied());
        cond.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DuplexStream {
    fn drop(&mut self) {
        for shared in [&self.read_from, &self.write_to] {
            let (lock, cond) = &**shared;
            lock.lock().unwrap().closed = true;
            cond.notify_all();
        }
    }
}

impl SessionStream for DuplexStream {
    fn start_tls(&mut self, _acceptor: &SslAcceptor) -> Result<(), Error> {
        Err(Error::TlsNotAvailable)
    }

    fn set_read_timeout(
        &mut self,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn set_write_timeout(
        &mut self,
        _timeout: Option<Duration>,
    ) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::{BufRead, BufReader};

    use super::*;

    #[test]
    fn round_trip() {
        let (mut a, b) = pair();
        let join = std::thread::spawn(move || {
            let mut reader = BufReader::new(b);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!("hello\n", line);
            reader.get_mut().write_all(b"world\n").unwrap();
        });

        a.write_all(b"hello\n").unwrap();
        let mut reader = BufReader::new(a);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!("world\n", line);
        join.join().unwrap();
    }

    #[test]
    fn read_after_peer_drop_is_eof() {
        let (mut a, b) = pair();
        drop(b);
        let mut buf = [0u8; 4];
        assert_eq!(0, a.read(&mut buf).unwrap());
    }
}
