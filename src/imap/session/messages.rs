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

//! Message placement commands: APPEND, COPY, MOVE, EXPUNGE, CLOSE,
//! UNSELECT.

use chrono::prelude::*;
use log::{info, warn};

use super::{store_error, CommandProcessor};
use crate::imap::response::{Code, CommandResponse, Tagged};
use crate::imap::syntax::SeqSet;
use crate::index::build_message;
use crate::mime::parser;
use crate::store::model::{Flag, Uid};
use crate::store::MessagePredicate;

impl CommandProcessor {
    /// Resolves a sequence or UID set against the snapshot, in ascending
    /// UID order.
    pub(super) fn resolve_set(&self, set: &SeqSet, uid: bool) -> Vec<Uid> {
        let selected =
            self.selected.as_ref().expect("resolve_set without selection");

        if uid {
            let max = selected.max_uid();
            selected
                .uids
                .iter()
                .copied()
                .filter(|u| set.contains(u.get(), max))
                .collect()
        } else {
            let count = selected.uids.len() as u32;
            selected
                .uids
                .iter()
                .copied()
                .enumerate()
                .filter(|(ix, _)| set.contains(*ix as u32 + 1, count))
                .map(|(_, u)| u)
                .collect()
        }
    }

    pub(super) fn cmd_append(
        &mut self,
        path: &str,
        flags: &[Flag],
        date: Option<DateTime<FixedOffset>>,
        raw: &[u8],
    ) -> CommandResponse {
        let user = self.user.clone().expect("APPEND without a user");

        let mailbox = match self.store.find_mailbox(&user.id, path) {
            Ok(Some(mailbox)) => mailbox,
            Ok(None) => {
                return CommandResponse::tagged(
                    Tagged::no("No such mailbox").with_code(Code::TryCreate),
                )
            },
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let quota = if user.quota > 0 {
            user.quota
        } else {
            self.config.imap.max_storage
        };
        if quota > 0 && user.storage_used + raw.len() as u64 > quota {
            return CommandResponse::tagged(
                Tagged::no("Storage quota exceeded")
                    .with_code(Code::OverQuota),
            );
        }

        let message_id = self.ids.generate();
        let mut tree = parser::parse(raw);
        let content = match self.indexer().index(&mut tree, &message_id) {
            Ok(content) => content,
            Err(e) => {
                warn!("{} APPEND indexing failed: {}", self.log_prefix, e);
                return CommandResponse::tagged(Tagged::no(
                    "Failed to store message content",
                ));
            },
        };

        let uid = match self.store.allocate_uid(&mailbox.id) {
            Ok(uid) => uid,
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let internal_date = date
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|| self.clock.now());
        let mut message = build_message(
            message_id,
            user.id.clone(),
            mailbox.id.clone(),
            uid,
            raw.len() as u64,
            internal_date,
            tree,
            content,
        );
        for &flag in flags {
            message.set_flag(flag, true);
        }

        if let Err(e) = self.store.insert_message(message) {
            return CommandResponse::tagged(store_error(&e));
        }
        if let Err(e) =
            self.store.update_storage_used(&user.id, raw.len() as i64)
        {
            warn!(
                "{} Failed to update storage accounting: {}",
                self.log_prefix, e
            );
        }

        info!(
            "{} APPEND {} octets to {} as UID {}",
            self.log_prefix,
            raw.len(),
            mailbox.path,
            uid.get(),
        );

        CommandResponse::tagged(
            Tagged::ok("APPEND completed").with_code(Code::AppendUid {
                uid_validity: mailbox.uid_validity,
                uid: uid.get(),
            }),
        )
    }

    /// COPY and, when `mv`, MOVE. The destination insert happens first;
    /// MOVE then removes the source messages and reports the expunges in
    /// descending sequence order.
    pub(super) fn cmd_copy(
        &mut self,
        set: &SeqSet,
        path: &str,
        uid: bool,
        mv: bool,
    ) -> CommandResponse {
        let verb = if mv { "MOVE" } else { "COPY" };
        if mv && self.selected.as_ref().map_or(false, |s| s.read_only) {
            return CommandResponse::tagged(
                Tagged::no("Mailbox is read-only").with_code(Code::Cannot),
            );
        }

        let arrivals = self.poll_arrivals();
        let user_id = self.user.as_ref().expect("copy without user").id.clone();
        let dest = match self.store.find_mailbox(&user_id, path) {
            Ok(Some(dest)) => dest,
            Ok(None) => {
                return CommandResponse::tagged(
                    Tagged::no("No such mailbox").with_code(Code::TryCreate),
                )
            },
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let uids = self.resolve_set(set, uid);
        if uids.is_empty() {
            return CommandResponse {
                untagged: arrivals,
                tagged: Tagged::ok(&format!(
                    "{} completed (no messages)",
                    verb
                )),
            };
        }

        let source_id =
            self.selected.as_ref().unwrap().mailbox.id.clone();
        let messages = match self.store.query_messages(
            &source_id,
            &MessagePredicate {
                uids: Some(uids.clone()),
                ..MessagePredicate::default()
            },
        ) {
            Ok(m) => m,
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let mut from_uids = Vec::new();
        let mut to_uids = Vec::new();
        for message in messages {
            let new_uid = match self.store.allocate_uid(&dest.id) {
                Ok(uid) => uid,
                Err(e) => return CommandResponse::tagged(store_error(&e)),
            };

            let mut copy = message.clone();
            copy.id = self.ids.generate();
            copy.mailbox = dest.id.clone();
            copy.uid = new_uid;
            copy.recent = true;

            if let Err(e) = self.store.insert_message(copy) {
                return CommandResponse::tagged(store_error(&e));
            }

            from_uids.push(message.uid);
            to_uids.push(new_uid);
        }

        let mut untagged = arrivals;
        if mv {
            if let Err(e) = self.store.delete_messages(
                &source_id,
                &MessagePredicate {
                    uids: Some(from_uids.clone()),
                    ..MessagePredicate::default()
                },
            ) {
                return CommandResponse::tagged(store_error(&e));
            }

            let selected = self.selected.as_mut().unwrap();
            let mut seqnums: Vec<u32> = from_uids
                .iter()
                .filter_map(|&u| selected.seqnum_of(u))
                .collect();
            seqnums.sort_unstable_by(|a, b| b.cmp(a));
            for seqnum in seqnums {
                untagged
                    .push(format!("* {} EXPUNGE", seqnum).into_bytes());
                selected.uids.remove(seqnum as usize - 1);
            }
        }

        info!(
            "{} {} {} messages to {}",
            self.log_prefix,
            verb,
            from_uids.len(),
            dest.path,
        );

        CommandResponse {
            untagged,
            tagged: Tagged::ok(&format!("{} completed", verb)).with_code(
                Code::CopyUid {
                    uid_validity: dest.uid_validity,
                    from: uid_set_string(&from_uids),
                    to: uid_set_string(&to_uids),
                },
            ),
        }
    }

    pub(super) fn cmd_expunge(&mut self) -> CommandResponse {
        if self.selected.as_ref().map_or(false, |s| s.read_only) {
            return CommandResponse::tagged(
                Tagged::no("Mailbox is read-only").with_code(Code::Cannot),
            );
        }

        let (untagged, freed) = match self.expunge_deleted() {
            Ok(r) => r,
            Err(response) => return response,
        };

        if freed > 0 {
            let user_id = self.user.as_ref().unwrap().id.clone();
            if let Err(e) =
                self.store.update_storage_used(&user_id, -(freed as i64))
            {
                warn!(
                    "{} Failed to update storage accounting: {}",
                    self.log_prefix, e
                );
            }
        }

        CommandResponse {
            untagged,
            tagged: Tagged::ok("EXPUNGE completed"),
        }
    }

    pub(super) fn cmd_close(&mut self) -> CommandResponse {
        let read_only =
            self.selected.as_ref().map_or(true, |s| s.read_only);

        if !read_only {
            match self.expunge_deleted() {
                Ok((_, freed)) if freed > 0 => {
                    let user_id =
                        self.user.as_ref().unwrap().id.clone();
                    let _ = self
                        .store
                        .update_storage_used(&user_id, -(freed as i64));
                },
                Ok(_) => (),
                Err(response) => return response,
            }
        }

        self.selected = None;
        CommandResponse::tagged(Tagged::ok("CLOSE completed"))
    }

    pub(super) fn cmd_unselect(&mut self) -> CommandResponse {
        self.selected = None;
        CommandResponse::tagged(Tagged::ok("UNSELECT completed"))
    }

    /// Removes `\Deleted` messages, returning the EXPUNGE responses (in
    /// ascending order with renumbering after each line) and the bytes
    /// freed.
    fn expunge_deleted(
        &mut self,
    ) -> Result<(Vec<Vec<u8>>, u64), CommandResponse> {
        let mailbox_id =
            self.selected.as_ref().unwrap().mailbox.id.clone();

        let doomed = self
            .store
            .query_messages(
                &mailbox_id,
                &MessagePredicate {
                    deleted: Some(true),
                    ..MessagePredicate::default()
                },
            )
            .map_err(|e| CommandResponse::tagged(store_error(&e)))?;

        if doomed.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let uids: Vec<Uid> = doomed.iter().map(|m| m.uid).collect();
        let freed: u64 = doomed.iter().map(|m| m.size).sum();

        self.store
            .delete_messages(
                &mailbox_id,
                &MessagePredicate {
                    uids: Some(uids.clone()),
                    ..MessagePredicate::default()
                },
            )
            .map_err(|e| CommandResponse::tagged(store_error(&e)))?;

        let selected = self.selected.as_mut().unwrap();
        let mut untagged = Vec::new();
        for uid in uids {
            if let Some(ix) =
                selected.uids.iter().position(|&u| u == uid)
            {
                untagged.push(format!("* {} EXPUNGE", ix + 1).into_bytes());
                selected.uids.remove(ix);
            }
        }

        Ok((untagged, freed))
    }
}

/// A comma-separated UID set for APPENDUID/COPYUID.
fn uid_set_string(uids: &[Uid]) -> String {
    uids.iter()
        .map(|u| u.get().to_string())
        .collect::<Vec<_>>()
        .join(",")
}
