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

//! The per-connection LMTP server loop.
//!
//! `Greeting → LHLO → MAIL → RCPT+ → DATA` with per-recipient outcomes:
//! after the payload, every accepted RCPT gets exactly one reply line, in
//! acceptance order. A failure for one recipient never affects another.

use std::borrow::Cow;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use super::codes::*;
use super::delivery::{self, Recipient};
use super::syntax::{
    looks_like_known_command, looks_like_smtp_helo, normalize_address,
    remove_address_tag, Command,
};
use crate::store::blob::BlobStore;
use crate::store::Store;
use crate::support::error::Error;
use crate::support::ids::{ArcClock, ArcIdSource};
use crate::support::log_prefix::LogPrefix;
use crate::support::net::SessionStream;
use crate::support::scanner::{Line, LineScanner};
use crate::support::system_config::SystemConfig;

const MAX_LINE: usize = 1024;
const MAX_DATA_LINE: usize = 64 * 1024;
const MAX_RECIPIENTS: usize = 100;

pub struct Server {
    io: LineScanner<Box<dyn SessionStream>>,
    log_prefix: LogPrefix,
    config: Arc<SystemConfig>,
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    clock: ArcClock,
    ids: ArcIdSource,

    quit: bool,
    has_lhlo: bool,
    return_path: Option<String>,
    recipients: Vec<Recipient>,
}

impl Server {
    pub fn new(
        stream: Box<dyn SessionStream>,
        log_prefix: LogPrefix,
        config: Arc<SystemConfig>,
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        clock: ArcClock,
        ids: ArcIdSource,
    ) -> Self {
        Server {
            io: LineScanner::new(stream),
            log_prefix,
            config,
            store,
            blobs,
            clock,
            ids,
            quit: false,
            has_lhlo: false,
            return_path: None,
            recipients: Vec::new(),
        }
    }

    pub fn run(&mut self) -> Result<(), Error> {
        let _ = self.io.get_mut().set_read_timeout(Some(
            Duration::from_secs(self.config.lmtp.read_timeout),
        ));
        let _ = self.io.get_mut().set_write_timeout(Some(
            Duration::from_secs(self.config.lmtp.write_timeout),
        ));

        let banner = self.config.lmtp.banner.clone();
        self.reply(&SmtpResponse(
            pc::ServiceReady,
            None,
            Cow::Owned(format!("{} ready", banner)),
        ))?;

        while !self.quit {
            self.run_command()?;
        }

        Ok(())
    }

    fn run_command(&mut self) -> Result<(), Error> {
        let mut line = Vec::new();
        match self.io.read_line(&mut line, MAX_LINE)? {
            Line::TooLong => {
                return self.reply(&SmtpResponse(
                    pc::CommandSyntaxError,
                    Some((cc::PermFail, sc::OtherProtocolStatus)),
                    Cow::Borrowed("Command line too long"),
                ));
            },
            Line::Complete { .. } => (),
        }

        let line = match String::from_utf8(line) {
            Ok(line) => line,
            Err(_) => {
                return self.reply(&SmtpResponse(
                    pc::CommandSyntaxError,
                    Some((cc::PermFail, sc::OtherProtocolStatus)),
                    Cow::Borrowed("Malformed UTF-8"),
                ));
            },
        };

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(()) => {
                warn!(
                    "{} Received bad command {:?}",
                    self.log_prefix,
                    line.chars().take(64).collect::<String>(),
                );
                return if looks_like_smtp_helo(&line) {
                    self.reply(&SmtpResponse(
                        pc::CommandSyntaxError,
                        Some((cc::PermFail, sc::WrongProtocolVersion)),
                        Cow::Borrowed("This is LMTP, not SMTP; use LHLO"),
                    ))
                } else if looks_like_known_command(&line) {
                    self.reply(&SmtpResponse(
                        pc::ParameterSyntaxError,
                        Some((cc::PermFail, sc::InvalidCommandArguments)),
                        Cow::Borrowed("Unknown command syntax"),
                    ))
                } else {
                    self.reply(&SmtpResponse(
                        pc::CommandSyntaxError,
                        Some((cc::PermFail, sc::InvalidCommand)),
                        Cow::Borrowed("Unrecognised command"),
                    ))
                };
            },
        };

        match command {
            Command::Lhlo(host) => self.cmd_lhlo(host),
            Command::MailFrom(from) => self.cmd_mail_from(from),
            Command::Recipient(to) => self.cmd_recipient(to),
            Command::Data => self.cmd_data(),
            Command::Reset => self.cmd_reset(),
            Command::Verify => self.reply(&SmtpResponse(
                pc::CannotVerify,
                Some((cc::Success, sc::OtherSecurity)),
                Cow::Borrowed("VRFY not supported"),
            )),
            Command::Expand => self.reply(&SmtpResponse(
                pc::ActionNotTakenPermanent,
                Some((cc::PermFail, sc::SystemNotAcceptingNetworkMessages)),
                Cow::Borrowed("There are no mailing lists here"),
            )),
            Command::Help => self.reply(&SmtpResponse(
                pc::HelpMessage,
                Some((cc::Success, sc::Undefined)),
                Cow::Borrowed("LHLO MAIL RCPT DATA RSET NOOP QUIT"),
            )),
            Command::Noop => self.reply(&SmtpResponse(
                pc::Ok,
                Some((cc::Success, sc::Undefined)),
                Cow::Borrowed("OK"),
            )),
            Command::Quit => {
                self.quit = true;
                self.reply(&SmtpResponse(
                    pc::ServiceClosing,
                    Some((cc::Success, sc::Undefined)),
                    Cow::Borrowed("Bye"),
                ))
            },
        }
    }

    fn cmd_lhlo(&mut self, host: String) -> Result<(), Error> {
        info!("{} LHLO from {}", self.log_prefix, host);
        self.has_lhlo = true;
        self.reset_transaction();

        let banner = self.config.lmtp.banner.clone();
        let extensions = [
            "PIPELINING".to_owned(),
            "8BITMIME".to_owned(),
            "ENHANCEDSTATUSCODES".to_owned(),
            format!("SIZE {}", self.config.lmtp.max_size),
        ];

        self.reply_continued(&SmtpResponse(
            pc::Ok,
            None,
            Cow::Owned(format!("{} at your service, {}", banner, host)),
        ))?;
        for (ix, extension) in extensions.iter().enumerate() {
            let response = SmtpResponse(
                pc::Ok,
                None,
                Cow::Owned(extension.clone()),
            );
            if ix + 1 == extensions.len() {
                self.reply(&response)?;
            } else {
                self.reply_continued(&response)?;
            }
        }
        Ok(())
    }

    fn cmd_mail_from(&mut self, from: String) -> Result<(), Error> {
        if !self.has_lhlo {
            return self.bad_sequence("Still waiting for LHLO");
        }
        if self.return_path.is_some() {
            return self.bad_sequence("Already got MAIL FROM");
        }

        info!("{} Start mail transaction from <{}>", self.log_prefix, from);
        // The reverse path is recorded as given; there is no relay policy
        // on an LMTP ingress.
        self.return_path = Some(from);
        self.reply(&SmtpResponse(
            pc::Ok,
            Some((cc::Success, sc::Undefined)),
            Cow::Borrowed("OK"),
        ))
    }

    fn cmd_recipient(&mut self, to: String) -> Result<(), Error> {
        if self.return_path.is_none() {
            return self.bad_sequence("Still waiting for MAIL FROM");
        }
        if self.recipients.len() >= MAX_RECIPIENTS {
            return self.reply(&SmtpResponse(
                pc::ActionNotTakenPermanent,
                Some((cc::PermFail, sc::TooManyRecipients)),
                Cow::Borrowed("Too many recipients"),
            ));
        }

        let original = normalize_address(&to);
        let normalised = remove_address_tag(&original);

        let address = match self.store.find_address(&normalised) {
            Ok(Some(address)) => address,
            Ok(None) => {
                return self.reply(&SmtpResponse(
                    pc::ActionNotTakenPermanent,
                    Some((
                        cc::PermFail,
                        sc::BadDestinationMailboxAddress,
                    )),
                    Cow::Borrowed("Unknown recipient"),
                ));
            },
            Err(e) => {
                warn!(
                    "{} Address lookup failed for {}: {}",
                    self.log_prefix, normalised, e
                );
                return self.reply(&SmtpResponse(
                    pc::ActionNotTakenTemporary,
                    Some((cc::TempFail, sc::OtherMailSystem)),
                    Cow::Borrowed("Temporary lookup failure"),
                ));
            },
        };

        let user = match self.store.find_user(&address.user) {
            Ok(Some(user)) if !user.disabled => user,
            Ok(Some(_)) => {
                return self.reply(&SmtpResponse(
                    pc::ActionNotTakenPermanent,
                    Some((cc::PermFail, sc::MailboxDisabled)),
                    Cow::Borrowed("User disabled"),
                ));
            },
            Ok(None) => {
                return self.reply(&SmtpResponse(
                    pc::ActionNotTakenPermanent,
                    Some((
                        cc::PermFail,
                        sc::BadDestinationMailboxAddress,
                    )),
                    Cow::Borrowed("Unknown recipient"),
                ));
            },
            Err(e) => {
                warn!(
                    "{} User lookup failed for {}: {}",
                    self.log_prefix, normalised, e
                );
                return self.reply(&SmtpResponse(
                    pc::ActionNotTakenTemporary,
                    Some((cc::TempFail, sc::OtherMailSystem)),
                    Cow::Borrowed("Temporary lookup failure"),
                ));
            },
        };

        self.recipients.push(Recipient {
            original,
            normalised,
            user,
        });
        self.reply(&SmtpResponse(
            pc::Ok,
            Some((cc::Success, sc::DestinationAddressValid)),
            Cow::Borrowed("OK"),
        ))
    }

    fn cmd_data(&mut self) -> Result<(), Error> {
        if self.recipients.is_empty() {
            return self.bad_sequence("No recipients");
        }

        self.reply(&SmtpResponse(
            pc::StartMailInput,
            None,
            Cow::Borrowed("Go ahead"),
        ))?;

        let payload = self.read_data(self.config.lmtp.max_size)?;

        let recipients = std::mem::take(&mut self.recipients);
        self.return_path = None;

        let payload = match payload {
            Some(payload) => payload,
            None => {
                // Oversize: still one complete reply per accepted
                // recipient, all 552
                for _ in &recipients {
                    self.reply(&SmtpResponse(
                        pc::ExceededStorageAllocation,
                        Some((
                            cc::PermFail,
                            sc::MessageLengthExceedsLimit,
                        )),
                        Cow::Owned(format!(
                            "Maximum message size is {} bytes",
                            self.config.lmtp.max_size
                        )),
                    ))?;
                }
                return Ok(());
            },
        };

        info!(
            "{} Received {} octets for {} recipients",
            self.log_prefix,
            payload.len(),
            recipients.len(),
        );

        // One status line per accepted RCPT, in acceptance order. A copy
        // of the config/handles keeps the borrow checker out of the loop.
        let config = Arc::clone(&self.config);
        let store = Arc::clone(&self.store);
        let blobs = Arc::clone(&self.blobs);
        let clock = Arc::clone(&self.clock);
        let ids = Arc::clone(&self.ids);
        let log_prefix = self.log_prefix.clone();

        // Each recipient gets its own complete reply; a dash continuation
        // here would collapse them into one multiline reply.
        for recipient in &recipients {
            let response = match delivery::deliver_local(
                &log_prefix,
                &config,
                &store,
                &blobs,
                &clock,
                &ids,
                recipient,
                &payload,
            ) {
                Ok(()) => SmtpResponse(
                    pc::Ok,
                    Some((cc::Success, sc::DestinationAddressValid)),
                    Cow::Owned(format!(
                        "<{}> delivered",
                        recipient.original
                    )),
                ),
                Err(response) => response,
            };

            self.reply(&response)?;
        }

        Ok(())
    }

    fn cmd_reset(&mut self) -> Result<(), Error> {
        self.reset_transaction();
        self.reply(&SmtpResponse(
            pc::Ok,
            Some((cc::Success, sc::Undefined)),
            Cow::Borrowed("OK"),
        ))
    }

    fn reset_transaction(&mut self) {
        self.return_path = None;
        self.recipients.clear();
    }

    /// Reads the dot-stuffed payload until `<CRLF>.<CRLF>`, reversing the
    /// stuffing. Returns `None` (with the payload fully consumed) when the
    /// size cap is exceeded.
    fn read_data(&mut self, max_size: u64) -> Result<Option<Vec<u8>>, Error> {
        let mut payload = Vec::new();
        let mut oversize = false;

        loop {
            let mut line = Vec::new();
            match self.io.read_line(&mut line, MAX_DATA_LINE)? {
                Line::TooLong => {
                    // An absurdly long line counts against the size cap
                    oversize = true;
                    continue;
                },
                Line::Complete { .. } => (),
            }

            if b"." == &line[..] {
                break;
            }

            let content: &[u8] = if line.starts_with(b".") {
                &line[1..]
            } else {
                &line[..]
            };

            if !oversize {
                payload.extend_from_slice(content);
                payload.extend_from_slice(b"\r\n");
                if payload.len() as u64 > max_size {
                    oversize = true;
                    payload.clear();
                }
            }
        }

        Ok(if oversize { None } else { Some(payload) })
    }

    fn bad_sequence(&mut self, text: &'static str) -> Result<(), Error> {
        self.reply(&SmtpResponse(
            pc::BadSequenceOfCommands,
            Some((cc::PermFail, sc::InvalidCommand)),
            Cow::Borrowed(text),
        ))
    }

    fn reply(&mut self, response: &SmtpResponse) -> Result<(), Error> {
        self.write_reply(response, true)
    }

    fn reply_continued(
        &mut self,
        response: &SmtpResponse,
    ) -> Result<(), Error> {
        self.write_reply(response, false)
    }

    fn write_reply(
        &mut self,
        response: &SmtpResponse,
        last: bool,
    ) -> Result<(), Error> {
        let stream = self.io.get_mut();
        stream.write_all(response.render(last).as_bytes())?;
        stream.write_all(b"\r\n")?;
        if last {
            stream.flush()?;
        }
        Ok(())
    }
}
