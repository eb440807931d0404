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

//! The per-connection IMAP server loop.
//!
//! Owns the transport and the line scanner; collects complete commands
//! (including `{N}` and `{N+}` literals), parses them, and shuttles the
//! processor's responses back out. STARTTLS and IDLE involve the transport
//! itself and are orchestrated here rather than in the processor.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use log::{info, warn};
use openssl::ssl::SslAcceptor;
use regex::bytes::Regex;

use super::response::Tagged;
use super::session::CommandProcessor;
use super::syntax::{self, Command};
use crate::support::error::Error;
use crate::support::net::{is_timeout, SessionStream};
use crate::support::scanner::{Line, LineScanner};

const MAX_CMDLINE: usize = 64 * 1024;
const APPEND_SIZE_LIMIT: u32 = 64 * 1024 * 1024;

/// How long IDLE sleeps between polls of the selected mailbox.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Read/write deadline outside IDLE.
const SESSION_DEADLINE: Duration = Duration::from_secs(600);

lazy_static! {
    static ref LITERAL_AT_EOL: Regex =
        Regex::new(r"\{([0-9]+)(\+?)\}$").unwrap();
}

pub struct Server {
    io: LineScanner<Box<dyn SessionStream>>,
    processor: CommandProcessor,
    ssl_acceptor: Option<Arc<SslAcceptor>>,
}

impl Server {
    pub fn new(
        stream: Box<dyn SessionStream>,
        processor: CommandProcessor,
        ssl_acceptor: Option<Arc<SslAcceptor>>,
    ) -> Self {
        Server {
            io: LineScanner::new(stream),
            processor,
            ssl_acceptor,
        }
    }

    /// Runs the session until logout, EOF, or a fatal transport error.
    pub fn run(&mut self) -> Result<(), Error> {
        let _ = self
            .io
            .get_mut()
            .set_read_timeout(Some(SESSION_DEADLINE));
        let _ = self
            .io
            .get_mut()
            .set_write_timeout(Some(SESSION_DEADLINE));

        let greeting = self.processor.greeting();
        self.send_line(&greeting)?;

        while !self.processor.logged_out() {
            self.run_command()?;
        }

        Ok(())
    }

    fn run_command(&mut self) -> Result<(), Error> {
        let mut text_parts: Vec<Vec<u8>> = vec![Vec::new()];
        let mut literals: Vec<Vec<u8>> = Vec::new();

        loop {
            let part = text_parts.last_mut().unwrap();
            match self.io.read_line(part, MAX_CMDLINE)? {
                Line::TooLong => {
                    self.send_line(b"* BAD Command line too long")?;
                    return Ok(());
                },
                Line::Complete { .. } => (),
            }

            let (length, plus, framing_start) = match trailing_literal(
                text_parts.last().unwrap(),
            ) {
                Some(framing) => framing,
                // No literal: the command is complete
                None => break,
            };

            if length > APPEND_SIZE_LIMIT {
                return self.reject_literal(&text_parts, length, plus);
            }

            // Strip the {N} framing from the text; the literal becomes its
            // own token.
            text_parts.last_mut().unwrap().truncate(framing_start);

            if !plus {
                self.send_raw(b"+ go\r\n")?;
            }

            let mut literal = Vec::with_capacity(length as usize);
            self.io.read_exact_to(&mut literal, length as usize)?;
            literals.push(literal);
            text_parts.push(Vec::new());
        }

        let tokens = match syntax::tokenize(&text_parts, &literals) {
            Ok(tokens) => tokens,
            Err(e) => {
                return self.send_bad(&text_parts, &e);
            },
        };

        let line = match syntax::parse_command(tokens) {
            Ok(line) => line,
            Err(e) => {
                return self.send_bad(&text_parts, &e);
            },
        };

        let tag = line.tag.clone();
        match line.cmd {
            Command::StartTls => self.handle_starttls(&tag, line),
            Command::Idle => self.handle_idle(&tag, line),
            _ => {
                let response = self.processor.handle_command(line);
                self.send_response(&tag, response)
            },
        }
    }

    fn handle_starttls(
        &mut self,
        tag: &str,
        line: syntax::CommandLine,
    ) -> Result<(), Error> {
        let response = self.processor.handle_command(line);
        let accepted = crate::imap::response::Cond::Ok == response.tagged.cond;
        self.send_response(tag, response)?;

        if !accepted {
            return Ok(());
        }

        let acceptor = match self.ssl_acceptor {
            Some(ref acceptor) => Arc::clone(acceptor),
            None => {
                warn!("STARTTLS accepted without an acceptor configured");
                return Err(Error::TlsNotAvailable);
            },
        };

        self.io.get_mut().start_tls(&acceptor)?;
        // Discard anything pipelined in plaintext
        self.io.reset();
        self.processor.set_tls_active(true);
        info!("TLS established");
        Ok(())
    }

    fn handle_idle(
        &mut self,
        tag: &str,
        line: syntax::CommandLine,
    ) -> Result<(), Error> {
        // The processor's IDLE arm validates state and provides the
        // eventual tagged completion.
        let completion = self.processor.handle_command(line);
        if crate::imap::response::Cond::Ok != completion.tagged.cond {
            return self.send_response(tag, completion);
        }

        self.send_raw(b"+ idling\r\n")?;
        let _ = self
            .io
            .get_mut()
            .set_read_timeout(Some(IDLE_POLL_INTERVAL));

        let result = self.idle_loop();

        let _ = self
            .io
            .get_mut()
            .set_read_timeout(Some(SESSION_DEADLINE));

        match result {
            Ok(()) => self.send_response(tag, completion),
            Err(e) => Err(e),
        }
    }

    fn idle_loop(&mut self) -> Result<(), Error> {
        loop {
            let mut line = Vec::new();
            match self.io.read_line(&mut line, MAX_CMDLINE) {
                Ok(Line::Complete { .. }) => {
                    if line.eq_ignore_ascii_case(b"DONE") {
                        for update in self.processor.poll() {
                            self.send_line(&update)?;
                        }
                        return Ok(());
                    }
                    // Anything else during IDLE is a protocol error;
                    // tolerate and keep idling.
                },
                Ok(Line::TooLong) => (),
                Err(e) if is_timeout(&e) => {
                    for update in self.processor.poll() {
                        self.send_line(&update)?;
                    }
                    self.io.get_mut().flush()?;
                },
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    fn reject_literal(
        &mut self,
        text_parts: &[Vec<u8>],
        length: u32,
        plus: bool,
    ) -> Result<(), Error> {
        if plus {
            // A non-synchronising literal is already on the wire; consume
            // and discard it so the stream stays framed.
            let mut remaining = length as usize;
            let mut sink = Vec::new();
            while remaining > 0 {
                sink.clear();
                let chunk = remaining.min(64 * 1024);
                self.io.read_exact_to(&mut sink, chunk)?;
                remaining -= chunk;
            }
        }

        self.send_bad(text_parts, "Literal too large")
    }

    fn send_bad(
        &mut self,
        text_parts: &[Vec<u8>],
        error: &str,
    ) -> Result<(), Error> {
        let tagged = Tagged::bad(error);
        match recover_tag(text_parts.first().map(Vec::as_slice)) {
            Some(tag) => {
                let line =
                    format!("{} {}", tag, tagged.render()).into_bytes();
                self.send_line(&line)
            },
            None => {
                let line = format!("* {}", tagged.render()).into_bytes();
                self.send_line(&line)
            },
        }
    }

    fn send_response(
        &mut self,
        tag: &str,
        response: crate::imap::response::CommandResponse,
    ) -> Result<(), Error> {
        for untagged in &response.untagged {
            self.send_line(untagged)?;
        }
        let line =
            format!("{} {}", tag, response.tagged.render()).into_bytes();
        self.send_line(&line)
    }

    fn send_line(&mut self, line: &[u8]) -> Result<(), Error> {
        let stream = self.io.get_mut();
        stream.write_all(line)?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        Ok(())
    }

    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let stream = self.io.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }
}

/// Detects a `{N}` or `{N+}` literal at the end of a command line,
/// returning the length, the non-synchronising flag, and the offset where
/// the framing begins.
fn trailing_literal(line: &[u8]) -> Option<(u32, bool, usize)> {
    let captures = LITERAL_AT_EOL.captures(line)?;
    let whole = captures.get(0)?;
    let length = std::str::from_utf8(captures.get(1)?.as_bytes())
        .ok()?
        .parse::<u32>()
        .ok()?;
    let plus = !captures.get(2)?.as_bytes().is_empty();
    Some((length, plus, whole.start()))
}

/// Best-effort extraction of the tag from an unparseable command.
fn recover_tag(line: Option<&[u8]>) -> Option<String> {
    let line = line?;
    let end = line.iter().position(|&b| b' ' == b).unwrap_or(line.len());
    if 0 == end {
        return None;
    }
    std::str::from_utf8(&line[..end])
        .ok()
        .filter(|tag| !tag.contains('*'))
        .map(str::to_owned)
}
