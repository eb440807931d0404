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

//! Mailbox-level commands: LIST, LSUB, SELECT, EXAMINE, CREATE, DELETE,
//! RENAME, SUBSCRIBE, UNSUBSCRIBE, STATUS, and the quota pair.

use std::collections::HashSet;

use regex::Regex;

use super::{store_error, CommandProcessor, Selected};
use crate::imap::lex::LexWriter;
use crate::imap::response::{Code, CommandResponse, Cond, Tagged};
use crate::imap::syntax::StatusItem;
use crate::store::model::{Flag, UserId};
use crate::store::MessagePredicate;

impl CommandProcessor {
    fn user_id(&self) -> UserId {
        self.user
            .as_ref()
            .map(|u| u.id.clone())
            .expect("authenticated command without a user")
    }

    pub(super) fn cmd_list(
        &mut self,
        reference: &str,
        pattern: &str,
        subscribed_only: bool,
    ) -> CommandResponse {
        let verb = if subscribed_only { "LSUB" } else { "LIST" };

        // An empty pattern asks for the hierarchy delimiter
        if pattern.is_empty() {
            return CommandResponse {
                untagged: vec![format!(
                    "* {} (\\Noselect) \"/\" \"\"",
                    verb
                )
                .into_bytes()],
                tagged: Tagged::ok(&format!("{} completed", verb)),
            };
        }

        let full_pattern = format!("{}{}", reference, pattern);
        let matcher = match pattern_to_regex(&full_pattern) {
            Some(m) => m,
            None => {
                return CommandResponse::tagged(Tagged::bad(
                    "Unintelligible LIST pattern",
                ))
            },
        };

        let mailboxes = match self
            .store
            .list_mailboxes(&self.user_id(), subscribed_only)
        {
            Ok(m) => m,
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let parents: HashSet<String> = mailboxes
            .iter()
            .filter_map(|m| {
                m.path.rfind('/').map(|ix| m.path[..ix].to_owned())
            })
            .collect();

        let mut untagged = Vec::new();
        for mailbox in &mailboxes {
            if !matcher.is_match(&mailbox.path) {
                continue;
            }

            let mut attributes = Vec::new();
            if parents.contains(&mailbox.path) {
                attributes.push("\\HasChildren");
            } else {
                attributes.push("\\HasNoChildren");
            }
            if let Some(special_use) = mailbox.special_use {
                // \Inbox is not a LIST attribute; INBOX is found by name
                if crate::store::model::SpecialUse::Inbox != special_use {
                    attributes.push(special_use.as_str());
                }
            }

            let mut line = Vec::new();
            let mut lex = LexWriter::new(&mut line);
            lex.verbatim("* ")
                .verbatim(verb)
                .verbatim(" (")
                .verbatim(&attributes.join(" "))
                .verbatim(") \"/\" ")
                .mailbox(&mailbox.path);
            untagged.push(line);
        }

        CommandResponse {
            untagged,
            tagged: Tagged::ok(&format!("{} completed", verb)),
        }
    }

    pub(super) fn cmd_select(
        &mut self,
        path: &str,
        read_only: bool,
    ) -> CommandResponse {
        // A failed SELECT leaves no mailbox selected
        self.selected = None;

        let mailbox = match self.store.find_mailbox(&self.user_id(), path) {
            Ok(Some(mailbox)) => mailbox,
            Ok(None) => {
                return CommandResponse::tagged(
                    Tagged::no("No such mailbox")
                        .with_code(Code::Nonexistent),
                )
            },
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let messages = match self
            .store
            .query_messages(&mailbox.id, &MessagePredicate::default())
        {
            Ok(m) => m,
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let uids: Vec<_> = messages.iter().map(|m| m.uid).collect();
        let recent: HashSet<_> = if read_only {
            // EXAMINE must not change anything, including \Recent
            messages.iter().filter(|m| m.recent).map(|m| m.uid).collect()
        } else {
            match self.store.claim_recent(&mailbox.id) {
                Ok(claimed) => claimed.into_iter().collect(),
                Err(e) => return CommandResponse::tagged(store_error(&e)),
            }
        };

        let first_unseen = messages
            .iter()
            .enumerate()
            .find(|(_, m)| m.unseen)
            .map(|(ix, _)| ix as u32 + 1);
        let highest_modseq = mailbox.modify_index;

        let mut untagged = vec![
            format!("* {} EXISTS", uids.len()).into_bytes(),
            format!("* {} RECENT", recent.len()).into_bytes(),
            format!(
                "* FLAGS ({})",
                Flag::ALL
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            )
            .into_bytes(),
            crate::imap::response::untagged_cond(
                Cond::Ok,
                Some(Code::PermanentFlags(
                    Flag::ALL.iter().map(ToString::to_string).collect(),
                )),
                "Flags permitted",
            ),
            crate::imap::response::untagged_cond(
                Cond::Ok,
                Some(Code::UidNext(mailbox.uid_next)),
                "Predicted next UID",
            ),
            crate::imap::response::untagged_cond(
                Cond::Ok,
                Some(Code::UidValidity(mailbox.uid_validity)),
                "UIDs valid",
            ),
            crate::imap::response::untagged_cond(
                Cond::Ok,
                Some(Code::HighestModseq(highest_modseq.0.max(1))),
                "Highest modseq",
            ),
        ];
        if let Some(unseen) = first_unseen {
            untagged.push(crate::imap::response::untagged_cond(
                Cond::Ok,
                Some(Code::Unseen(unseen)),
                "First unseen message",
            ));
        }

        self.selected = Some(Selected {
            mailbox,
            read_only,
            uids,
            recent,
            highest_modseq,
        });

        CommandResponse {
            untagged,
            tagged: Tagged {
                cond: Cond::Ok,
                code: Some(if read_only {
                    Code::ReadOnly
                } else {
                    Code::ReadWrite
                }),
                text: if read_only {
                    "EXAMINE completed".to_owned()
                } else {
                    "SELECT completed".to_owned()
                },
            },
        }
    }

    pub(super) fn cmd_create(&mut self, path: &str) -> CommandResponse {
        if "INBOX" == path {
            return CommandResponse::tagged(
                Tagged::no("INBOX already exists")
                    .with_code(Code::AlreadyExists),
            );
        }

        match self.store.create_mailbox(&self.user_id(), path, None) {
            Ok(_) => {
                CommandResponse::tagged(Tagged::ok("CREATE completed"))
            },
            Err(e) => CommandResponse::tagged(store_error(&e)),
        }
    }

    pub(super) fn cmd_delete(&mut self, path: &str) -> CommandResponse {
        match self.store.delete_mailbox(&self.user_id(), path) {
            Ok(()) => {
                // Deleting the selected mailbox implicitly deselects
                if self
                    .selected
                    .as_ref()
                    .map_or(false, |s| s.mailbox.path == path)
                {
                    self.selected = None;
                }
                CommandResponse::tagged(Tagged::ok("DELETE completed"))
            },
            Err(e) => CommandResponse::tagged(store_error(&e)),
        }
    }

    pub(super) fn cmd_rename(
        &mut self,
        from: &str,
        to: &str,
    ) -> CommandResponse {
        match self.store.rename_mailbox(&self.user_id(), from, to) {
            Ok(()) => CommandResponse::tagged(Tagged::ok("RENAME completed")),
            Err(e) => CommandResponse::tagged(store_error(&e)),
        }
    }

    pub(super) fn cmd_subscribe(
        &mut self,
        path: &str,
        subscribed: bool,
    ) -> CommandResponse {
        match self.store.set_subscribed(&self.user_id(), path, subscribed) {
            Ok(()) => CommandResponse::tagged(Tagged::ok(if subscribed {
                "SUBSCRIBE completed"
            } else {
                "UNSUBSCRIBE completed"
            })),
            Err(e) => CommandResponse::tagged(store_error(&e)),
        }
    }

    pub(super) fn cmd_status(
        &mut self,
        path: &str,
        items: &[StatusItem],
    ) -> CommandResponse {
        let mailbox = match self.store.find_mailbox(&self.user_id(), path) {
            Ok(Some(mailbox)) => mailbox,
            Ok(None) => {
                return CommandResponse::tagged(
                    Tagged::no("No such mailbox")
                        .with_code(Code::Nonexistent),
                )
            },
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let messages = match self
            .store
            .query_messages(&mailbox.id, &MessagePredicate::default())
        {
            Ok(m) => m,
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let rendered: Vec<String> = items
            .iter()
            .map(|item| match item {
                StatusItem::Messages => {
                    format!("MESSAGES {}", messages.len())
                },
                StatusItem::Recent => format!(
                    "RECENT {}",
                    messages.iter().filter(|m| m.recent).count()
                ),
                StatusItem::UidNext => {
                    format!("UIDNEXT {}", mailbox.uid_next)
                },
                StatusItem::UidValidity => {
                    format!("UIDVALIDITY {}", mailbox.uid_validity)
                },
                StatusItem::Unseen => format!(
                    "UNSEEN {}",
                    messages.iter().filter(|m| m.unseen).count()
                ),
                StatusItem::HighestModseq => {
                    format!("HIGHESTMODSEQ {}", mailbox.modify_index.0)
                },
            })
            .collect();

        let mut line = Vec::new();
        let mut lex = LexWriter::new(&mut line);
        lex.verbatim("* STATUS ").mailbox(&mailbox.path);
        lex.verbatim(" (").verbatim(&rendered.join(" ")).verbatim(")");

        CommandResponse {
            untagged: vec![line],
            tagged: Tagged::ok("STATUS completed"),
        }
    }

    pub(super) fn cmd_getquotaroot(
        &mut self,
        path: &str,
    ) -> CommandResponse {
        match self.store.find_mailbox(&self.user_id(), path) {
            Ok(Some(_)) => (),
            Ok(None) => {
                return CommandResponse::tagged(
                    Tagged::no("No such mailbox")
                        .with_code(Code::Nonexistent),
                )
            },
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        }

        let mut root_line = Vec::new();
        let mut lex = LexWriter::new(&mut root_line);
        lex.verbatim("* QUOTAROOT ").mailbox(path).verbatim(" \"\"");

        let mut response = self.quota_response();
        response.untagged.insert(0, root_line);
        response.tagged = Tagged::ok("GETQUOTAROOT completed");
        response
    }

    pub(super) fn cmd_getquota(&mut self, root: &str) -> CommandResponse {
        if !root.is_empty() {
            return CommandResponse::tagged(
                Tagged::no("No such quota root")
                    .with_code(Code::Nonexistent),
            );
        }

        let mut response = self.quota_response();
        response.tagged = Tagged::ok("GETQUOTA completed");
        response
    }

    fn quota_response(&self) -> CommandResponse {
        let user = self.user.as_ref().expect("quota without a user");
        let quota = if user.quota > 0 {
            user.quota
        } else {
            self.config.imap.max_storage
        };

        let line = if quota > 0 {
            format!(
                "* QUOTA \"\" (STORAGE {} {})",
                user.storage_used / 1024,
                quota / 1024,
            )
        } else {
            "* QUOTA \"\" ()".to_owned()
        };

        CommandResponse {
            untagged: vec![line.into_bytes()],
            tagged: Tagged::ok("QUOTA completed"),
        }
    }
}

/// Translates a LIST pattern into a regex: `*` matches anything, `%`
/// anything but the hierarchy delimiter.
fn pattern_to_regex(pattern: &str) -> Option<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '%' => regex.push_str("[^/]*"),
            ch => regex.push_str(&regex::escape(&ch.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).ok()
}
