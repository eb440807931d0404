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

//! The IMAP command processor: per-session state and per-command
//! semantics. The server loop owns the transport; everything here works on
//! parsed commands and returns rendered responses.

mod fetch;
mod mailboxes;
mod messages;
mod search;

use std::collections::HashSet;
use std::sync::Arc;

use log::{info, warn};

use super::response::{CommandResponse, Cond, Tagged};
use super::syntax::{Command, CommandLine};
use crate::index::Indexer;
use crate::store::blob::BlobStore;
use crate::store::model::{Mailbox, Modseq, Uid, User};
use crate::store::{MessagePredicate, Store};
use crate::support::error::Error;
use crate::support::ids::{ArcClock, ArcIdSource};
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::SystemConfig;

/// The point-in-time view of the selected mailbox.
///
/// Sequence numbers are positions in `uids` (1-based); the snapshot only
/// changes when the session is allowed to tell the client about it.
pub struct Selected {
    pub mailbox: Mailbox,
    pub read_only: bool,
    pub uids: Vec<Uid>,
    /// UIDs this session observes as `\Recent`.
    pub recent: HashSet<Uid>,
    pub highest_modseq: Modseq,
}

impl Selected {
    pub fn seqnum_of(&self, uid: Uid) -> Option<u32> {
        self.uids
            .iter()
            .position(|&u| u == uid)
            .map(|ix| ix as u32 + 1)
    }

    pub fn max_uid(&self) -> u32 {
        self.uids.last().map(|u| u.get()).unwrap_or(0)
    }
}

pub struct CommandProcessor {
    pub(super) log_prefix: LogPrefix,
    pub(super) config: Arc<SystemConfig>,
    pub(super) store: Arc<dyn Store>,
    pub(super) blobs: Arc<dyn BlobStore>,
    pub(super) clock: ArcClock,
    pub(super) ids: ArcIdSource,

    pub(super) tls_active: bool,
    pub(super) user: Option<User>,
    pub(super) selected: Option<Selected>,
    logout: bool,
}

impl CommandProcessor {
    pub fn new(
        log_prefix: LogPrefix,
        config: Arc<SystemConfig>,
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        clock: ArcClock,
        ids: ArcIdSource,
    ) -> Self {
        CommandProcessor {
            log_prefix,
            config,
            store,
            blobs,
            clock,
            ids,
            tls_active: false,
            user: None,
            selected: None,
            logout: false,
        }
    }

    pub fn greeting(&self) -> Vec<u8> {
        b"* OK IMAP4rev1 Server Ready".to_vec()
    }

    pub fn logged_out(&self) -> bool {
        self.logout
    }

    pub fn set_tls_active(&mut self, active: bool) {
        self.tls_active = active;
    }

    /// Whether STARTTLS is currently offered.
    pub fn starttls_available(&self) -> bool {
        self.config.tls.is_some()
            && !self.config.imap.starttls_disabled
            && !self.tls_active
    }

    pub(super) fn indexer(&self) -> Indexer {
        Indexer::new(Arc::clone(&self.blobs), Arc::clone(&self.ids))
    }

    pub fn handle_command(&mut self, line: CommandLine) -> CommandResponse {
        let CommandLine { tag: _, cmd } = line;

        match cmd {
            Command::Capability => self.cmd_capability(),
            Command::Noop | Command::Check => self.cmd_noop(),
            Command::Logout => self.cmd_logout(),
            Command::Namespace => self.cmd_namespace(),

            // STARTTLS is completed by the server loop; the processor only
            // validates that the offer stands.
            Command::StartTls => {
                if self.user.is_some() {
                    CommandResponse::tagged(Tagged::bad(
                        "STARTTLS is only valid before login",
                    ))
                } else if self.starttls_available() {
                    CommandResponse::tagged(Tagged::ok(
                        "Begin TLS negotiation now",
                    ))
                } else {
                    CommandResponse::tagged(Tagged::bad(
                        "STARTTLS is not available",
                    ))
                }
            },

            Command::Login { user, password } => {
                self.cmd_login(&user, &password)
            },

            Command::List { reference, pattern } => {
                self.authenticated(|p| p.cmd_list(&reference, &pattern, false))
            },
            Command::Lsub { reference, pattern } => {
                self.authenticated(|p| p.cmd_list(&reference, &pattern, true))
            },
            Command::Select(mailbox) => {
                self.authenticated(|p| p.cmd_select(&mailbox, false))
            },
            Command::Examine(mailbox) => {
                self.authenticated(|p| p.cmd_select(&mailbox, true))
            },
            Command::Create(mailbox) => {
                self.authenticated(|p| p.cmd_create(&mailbox))
            },
            Command::Delete(mailbox) => {
                self.authenticated(|p| p.cmd_delete(&mailbox))
            },
            Command::Rename { from, to } => {
                self.authenticated(|p| p.cmd_rename(&from, &to))
            },
            Command::Subscribe(mailbox) => {
                self.authenticated(|p| p.cmd_subscribe(&mailbox, true))
            },
            Command::Unsubscribe(mailbox) => {
                self.authenticated(|p| p.cmd_subscribe(&mailbox, false))
            },
            Command::Status { mailbox, items } => {
                self.authenticated(|p| p.cmd_status(&mailbox, &items))
            },
            Command::GetQuotaRoot(mailbox) => {
                self.authenticated(|p| p.cmd_getquotaroot(&mailbox))
            },
            Command::GetQuota(root) => {
                self.authenticated(|p| p.cmd_getquota(&root))
            },
            Command::Append {
                mailbox,
                flags,
                date,
                message,
            } => self.authenticated(|p| {
                p.cmd_append(&mailbox, &flags, date, &message)
            }),

            // IDLE is driven by the server loop; reaching here only checks
            // state.
            Command::Idle => {
                if self.user.is_some() {
                    CommandResponse::tagged(Tagged::ok("IDLE terminated"))
                } else {
                    self.must_authenticate()
                }
            },

            Command::Close => self.selected_cmd(|p| p.cmd_close()),
            Command::Unselect => self.selected_cmd(|p| p.cmd_unselect()),
            Command::Expunge => self.selected_cmd(|p| p.cmd_expunge()),
            Command::Fetch { set, items, uid } => {
                self.selected_cmd(|p| p.cmd_fetch(&set, &items, uid))
            },
            Command::Store {
                set,
                mode,
                silent,
                flags,
                uid,
            } => self.selected_cmd(|p| {
                p.cmd_store(&set, mode, silent, &flags, uid)
            }),
            Command::Copy { set, mailbox, uid } => {
                self.selected_cmd(|p| p.cmd_copy(&set, &mailbox, uid, false))
            },
            Command::Move { set, mailbox, uid } => {
                self.selected_cmd(|p| p.cmd_copy(&set, &mailbox, uid, true))
            },
            Command::Search { keys, uid } => {
                self.selected_cmd(|p| p.cmd_search(&keys, uid))
            },
        }
    }

    fn authenticated(
        &mut self,
        f: impl FnOnce(&mut Self) -> CommandResponse,
    ) -> CommandResponse {
        if self.user.is_some() {
            f(self)
        } else {
            self.must_authenticate()
        }
    }

    fn selected_cmd(
        &mut self,
        f: impl FnOnce(&mut Self) -> CommandResponse,
    ) -> CommandResponse {
        if self.user.is_none() {
            self.must_authenticate()
        } else if self.selected.is_none() {
            CommandResponse::tagged(Tagged::bad("No mailbox selected"))
        } else {
            f(self)
        }
    }

    fn must_authenticate(&self) -> CommandResponse {
        CommandResponse::tagged(Tagged::bad("Log in first"))
    }

    fn cmd_capability(&self) -> CommandResponse {
        CommandResponse {
            untagged: vec![self.capability_line()],
            tagged: Tagged::ok("CAPABILITY completed"),
        }
    }

    pub fn capability_line(&self) -> Vec<u8> {
        let mut line = b"* CAPABILITY IMAP4rev1 LITERAL+ IDLE NAMESPACE \
            UIDPLUS QUOTA LIST-EXTENDED CHILDREN UNSELECT MOVE SPECIAL-USE"
            .to_vec();
        if self.starttls_available() {
            line.extend_from_slice(b" STARTTLS");
        }
        line
    }

    fn cmd_noop(&mut self) -> CommandResponse {
        CommandResponse {
            untagged: self.poll(),
            tagged: Tagged::ok("NOOP completed"),
        }
    }

    fn cmd_logout(&mut self) -> CommandResponse {
        self.logout = true;
        self.selected = None;
        info!("{} Logging out", self.log_prefix);
        CommandResponse {
            untagged: vec![b"* BYE Logging out".to_vec()],
            tagged: Tagged::ok("LOGOUT completed"),
        }
    }

    fn cmd_namespace(&self) -> CommandResponse {
        if self.user.is_none() {
            return self.must_authenticate();
        }
        CommandResponse {
            untagged: vec![
                b"* NAMESPACE ((\"\" \"/\")) NIL NIL".to_vec()
            ],
            tagged: Tagged::ok("NAMESPACE completed"),
        }
    }

    fn cmd_login(&mut self, name: &str, password: &str) -> CommandResponse {
        if self.user.is_some() {
            return CommandResponse::tagged(Tagged::bad(
                "Already logged in",
            ));
        }

        // One NO for every failure mode; the reply never hints at which
        // field was wrong.
        let user = match self.store.find_user_by_name(name) {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(
                    "{} Login failed for unknown user {:?}",
                    self.log_prefix, name
                );
                return CommandResponse::tagged(Tagged::no(
                    "Bad user name or password",
                ));
            },
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        if user.disabled || !user.verify_password(password) {
            warn!("{} Login failed for {:?}", self.log_prefix, name);
            return CommandResponse::tagged(Tagged::no(
                "Bad user name or password",
            ));
        }

        self.log_prefix.set_user(user.name.clone());
        info!("{} Login successful", self.log_prefix);
        self.user = Some(user);
        CommandResponse::tagged(Tagged::ok("LOGIN completed"))
    }

    /// Admits newly arrived messages into the snapshot, rendering the
    /// EXISTS/RECENT growth. Used at the start of data commands, where
    /// announcing arrivals is legal but EXPUNGE is not.
    pub(super) fn poll_arrivals(&mut self) -> Vec<Vec<u8>> {
        let selected = match self.selected {
            Some(ref mut s) => s,
            None => return Vec::new(),
        };

        let messages = match self
            .store
            .query_messages(&selected.mailbox.id, &MessagePredicate::default())
        {
            Ok(m) => m,
            Err(e) => {
                warn!("{} Poll failed: {}", self.log_prefix, e);
                return Vec::new();
            },
        };

        let known: HashSet<Uid> = selected.uids.iter().copied().collect();
        let mut grew = false;
        for message in &messages {
            if !known.contains(&message.uid) {
                selected.uids.push(message.uid);
                selected.highest_modseq =
                    selected.highest_modseq.max(message.modseq);
                grew = true;
            }
        }

        if !grew {
            return Vec::new();
        }

        selected.uids.sort();
        if !selected.read_only {
            if let Ok(claimed) = self.store.claim_recent(&selected.mailbox.id)
            {
                selected.recent.extend(claimed);
            }
        }

        vec![
            format!("* {} EXISTS", selected.uids.len()).into_bytes(),
            format!("* {} RECENT", selected.recent.len()).into_bytes(),
        ]
    }

    /// Re-reads the selected mailbox and renders whatever changed since the
    /// snapshot: expunges, new arrivals, and flag updates.
    pub fn poll(&mut self) -> Vec<Vec<u8>> {
        let selected = match self.selected {
            Some(ref mut s) => s,
            None => return Vec::new(),
        };

        let messages = match self
            .store
            .query_messages(&selected.mailbox.id, &MessagePredicate::default())
        {
            Ok(m) => m,
            Err(e) => {
                warn!("{} Poll failed: {}", self.log_prefix, e);
                return Vec::new();
            },
        };

        let mut out = Vec::new();
        let current: HashSet<Uid> = messages.iter().map(|m| m.uid).collect();

        // Expunges, by descending pre-expunge sequence number
        for ix in (0..selected.uids.len()).rev() {
            if !current.contains(&selected.uids[ix]) {
                out.push(format!("* {} EXPUNGE", ix + 1).into_bytes());
                selected.uids.remove(ix);
            }
        }

        // Arrivals
        let known: HashSet<Uid> = selected.uids.iter().copied().collect();
        let mut grew = false;
        for message in &messages {
            if !known.contains(&message.uid) {
                selected.uids.push(message.uid);
                grew = true;
            }
        }
        if grew {
            selected.uids.sort();
            out.push(
                format!("* {} EXISTS", selected.uids.len()).into_bytes(),
            );

            if !selected.read_only {
                if let Ok(claimed) =
                    self.store.claim_recent(&selected.mailbox.id)
                {
                    selected.recent.extend(claimed);
                }
            }
            out.push(
                format!("* {} RECENT", selected.recent.len()).into_bytes(),
            );
        }

        // Flag updates on messages the snapshot already knew
        let mut highest = selected.highest_modseq;
        for message in &messages {
            if message.modseq > selected.highest_modseq
                && known.contains(&message.uid)
            {
                if let Some(seqnum) = selected.seqnum_of(message.uid) {
                    let mut flags = message.flags();
                    if selected.recent.contains(&message.uid)
                        && !flags.iter().any(|f| "\\Recent" == f)
                    {
                        flags.push("\\Recent".to_owned());
                    }
                    out.push(
                        format!(
                            "* {} FETCH (FLAGS ({}) UID {})",
                            seqnum,
                            flags.join(" "),
                            message.uid.get(),
                        )
                        .into_bytes(),
                    );
                }
            }
            highest = highest.max(message.modseq);
        }
        selected.highest_modseq = highest;

        out
    }
}

/// Maps a store error to the tagged response the client should see.
pub(super) fn store_error(e: &Error) -> Tagged {
    use super::response::Code;

    match e {
        Error::NxMailbox => {
            Tagged::no("No such mailbox").with_code(Code::Nonexistent)
        },
        Error::MailboxExists => {
            Tagged::no("Mailbox already exists").with_code(Code::AlreadyExists)
        },
        Error::BadOperationOnInbox => {
            Tagged::no("Not allowed for INBOX").with_code(Code::Cannot)
        },
        Error::BadOperationOnSpecialUse => Tagged::no(
            "Not allowed for a special-use mailbox",
        )
        .with_code(Code::Cannot),
        Error::UnsafeName => {
            Tagged::no("Unsafe mailbox name").with_code(Code::Cannot)
        },
        Error::RenameToSelf | Error::RenameIntoSelf => {
            Tagged::no("Bad rename destination").with_code(Code::Cannot)
        },
        Error::OverQuota => {
            Tagged::no("Storage quota exceeded").with_code(Code::OverQuota)
        },
        e => Tagged {
            cond: Cond::No,
            code: None,
            text: format!("Unexpected error: {}", e),
        },
    }
}
