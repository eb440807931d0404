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

//! Buffered line scanning shared by the protocol front ends.
//!
//! Both IMAP and LMTP are line-oriented with occasional exact-length binary
//! reads (IMAP literals). `LineScanner` wraps the session transport with a
//! small read buffer, and can be reset after a transport upgrade (STARTTLS)
//! so that no plaintext-buffered bytes leak into the TLS-framed stream.

use std::io::{self, Read};

use memchr::memchr;

const BUFFER_SIZE: usize = 8192;

/// Outcome of reading one line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Line {
    /// A complete line was appended to the output; `len` is the number of
    /// bytes appended, with the ending (CRLF or bare LF) removed.
    Complete { len: usize },
    /// The line exceeded the caller's limit. The entire line, including the
    /// ending, has been consumed and discarded; nothing beyond the limit was
    /// appended to the output.
    TooLong,
}

pub struct LineScanner<R> {
    inner: R,
    buf: Box<[u8]>,
    start: usize,
    end: usize,
}

impl<R: Read> LineScanner<R> {
    pub fn new(inner: R) -> Self {
        LineScanner {
            inner,
            buf: vec![0u8; BUFFER_SIZE].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Discard any buffered bytes.
    ///
    /// Used after STARTTLS: whatever the peer pipelined in plaintext after
    /// the command must not be interpreted as TLS-framed input.
    pub fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    fn fill(&mut self) -> io::Result<usize> {
        if self.start == self.end {
            self.start = 0;
            self.end = self.inner.read(&mut self.buf)?;
        }
        Ok(self.end - self.start)
    }

    /// Read one CRLF- or LF-delimited line, appending it (ending removed) to
    /// `out`.
    ///
    /// Lines longer than `max` bytes are consumed in full and reported as
    /// `Line::TooLong` without growing `out` past the limit. EOF before the
    /// line ending is an `UnexpectedEof` error.
    pub fn read_line(
        &mut self,
        out: &mut Vec<u8>,
        max: usize,
    ) -> io::Result<Line> {
        let base = out.len();
        let mut too_long = false;

        loop {
            if 0 == self.fill()? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF reached before end of line",
                ));
            }

            let available = &self.buf[self.start..self.end];
            let (chunk, found_eol) = match memchr(b'\n', available) {
                Some(ix) => (&available[..ix], true),
                None => (available, false),
            };

            if !too_long {
                out.extend_from_slice(chunk);
                if out.len() - base > max {
                    out.truncate(base);
                    too_long = true;
                }
            }

            self.start += chunk.len() + usize::from(found_eol);

            if found_eol {
                if too_long {
                    return Ok(Line::TooLong);
                }

                if out.ends_with(b"\r") {
                    out.pop();
                }
                return Ok(Line::Complete {
                    len: out.len() - base,
                });
            }
        }
    }

    /// Read exactly `n` bytes, appending them to `out`.
    pub fn read_exact_to(
        &mut self,
        out: &mut Vec<u8>,
        n: usize,
    ) -> io::Result<()> {
        let mut remaining = n;
        while remaining > 0 {
            if 0 == self.fill()? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF reached inside literal",
                ));
            }

            let take = remaining.min(self.end - self.start);
            out.extend_from_slice(&self.buf[self.start..self.start + take]);
            self.start += take;
            remaining -= take;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scan(input: &[u8]) -> LineScanner<&[u8]> {
        LineScanner::new(input)
    }

    #[test]
    fn reads_dos_and_unix_lines() {
        let mut s = scan(b"first\r\nsecond\nthird\r\n");
        let mut out = Vec::new();

        assert_matches!(Ok(Line::Complete { len: 5 }), s.read_line(&mut out, 100));
        assert_eq!(b"first", &out[..]);

        out.clear();
        assert_matches!(Ok(Line::Complete { len: 6 }), s.read_line(&mut out, 100));
        assert_eq!(b"second", &out[..]);

        out.clear();
        assert_matches!(Ok(Line::Complete { len: 5 }), s.read_line(&mut out, 100));
        assert_eq!(b"third", &out[..]);

        out.clear();
        assert!(s.read_line(&mut out, 100).is_err());
    }

    #[test]
    fn too_long_lines_are_swallowed() {
        let mut s = scan(b"aaaaaaaaaaaaaaaa\r\nok\r\n");
        let mut out = Vec::new();

        assert_matches!(Ok(Line::TooLong), s.read_line(&mut out, 8));
        assert!(out.is_empty());
        assert_matches!(Ok(Line::Complete { len: 2 }), s.read_line(&mut out, 8));
        assert_eq!(b"ok", &out[..]);
    }

    #[test]
    fn literal_reads_mix_with_lines() {
        let mut s = scan(b"APPEND {5}\r\nab\r\nc done\r\n");
        let mut out = Vec::new();

        assert_matches!(Ok(Line::Complete { .. }), s.read_line(&mut out, 100));
        assert_eq!(b"APPEND {5}", &out[..]);

        let mut lit = Vec::new();
        s.read_exact_to(&mut lit, 5).unwrap();
        assert_eq!(b"ab\r\nc", &lit[..]);

        out.clear();
        assert_matches!(Ok(Line::Complete { .. }), s.read_line(&mut out, 100));
        assert_eq!(b" done", &out[..]);
    }

    #[test]
    fn eof_mid_literal_is_an_error() {
        let mut s = scan(b"abc");
        let mut out = Vec::new();
        assert!(s.read_exact_to(&mut out, 5).is_err());
    }
}
