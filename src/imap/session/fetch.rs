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

//! FETCH and STORE.

use super::{store_error, CommandProcessor};
use crate::imap::lex::LexWriter;
use crate::imap::response::{Code, CommandResponse, Tagged};
use crate::imap::syntax::{FetchAtt, Section, SeqSet, StoreMode};
use crate::mime::bodystructure::{body_structure, BodyStructureOptions};
use crate::mime::parser;
use crate::store::model::{Flag, Message};
use crate::store::MessagePredicate;

impl CommandProcessor {
    pub(super) fn cmd_fetch(
        &mut self,
        set: &SeqSet,
        items: &[FetchAtt],
        uid: bool,
    ) -> CommandResponse {
        let mut arrivals = self.poll_arrivals();

        let uids = self.resolve_set(set, uid);
        if uids.is_empty() {
            return CommandResponse {
                untagged: arrivals,
                tagged: Tagged::ok("FETCH completed (no messages)"),
            };
        }

        let read_only = self.selected.as_ref().unwrap().read_only;
        let mailbox_id = self.selected.as_ref().unwrap().mailbox.id.clone();
        let messages = match self.store.query_messages(
            &mailbox_id,
            &MessagePredicate {
                uids: Some(uids),
                ..MessagePredicate::default()
            },
        ) {
            Ok(m) => m,
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        // A fetch of body content (without PEEK) implicitly sets \Seen
        let sets_seen = !read_only
            && items.iter().any(|item| {
                matches!(item, FetchAtt::BodySection { peek: false, .. })
            });

        let mut untagged = std::mem::take(&mut arrivals);
        for mut message in messages {
            let seqnum =
                match self.selected.as_ref().unwrap().seqnum_of(message.uid)
                {
                    Some(seqnum) => seqnum,
                    // A message that raced in is not addressable yet
                    None => continue,
                };

            let mut implicit_seen = false;
            if sets_seen && message.unseen {
                match self.store.update_flags(
                    &mailbox_id,
                    &[message.uid],
                    &[Flag::Seen],
                    &[],
                ) {
                    Ok(_) => {
                        message.set_flag(Flag::Seen, true);
                        implicit_seen = true;
                    },
                    Err(e) => {
                        return CommandResponse::tagged(store_error(&e))
                    },
                }
            }

            let mut parts = Vec::new();
            for item in items {
                parts.push(self.fetch_item(item, &message));
            }
            if implicit_seen
                && !items.iter().any(|i| matches!(i, FetchAtt::Flags))
            {
                parts.push(self.fetch_item(&FetchAtt::Flags, &message));
            }

            let mut line = Vec::new();
            line.extend_from_slice(
                format!("* {} FETCH (", seqnum).as_bytes(),
            );
            for (ix, part) in parts.iter().enumerate() {
                if ix > 0 {
                    line.push(b' ');
                }
                line.extend_from_slice(part);
            }
            line.push(b')');
            untagged.push(line);
        }

        CommandResponse {
            untagged,
            tagged: Tagged::ok("FETCH completed"),
        }
    }

    fn fetch_item(&self, item: &FetchAtt, message: &Message) -> Vec<u8> {
        let mut out = Vec::new();
        let mut lex = LexWriter::new(&mut out);

        match item {
            FetchAtt::Uid => {
                lex.verbatim("UID ").num(message.uid.get());
            },
            FetchAtt::Flags => {
                lex.verbatim("FLAGS ")
                    .flags(&self.session_flags(message));
            },
            FetchAtt::InternalDate => {
                lex.verbatim("INTERNALDATE ")
                    .datetime(&message.internal_date);
            },
            FetchAtt::Rfc822Size => {
                lex.verbatim("RFC822.SIZE ").num_u64(message.size);
            },
            FetchAtt::Envelope => {
                lex.verbatim("ENVELOPE ")
                    .verbatim(&message.envelope.to_field().to_wire());
            },
            FetchAtt::Body => {
                let field = body_structure(
                    &message.mime_tree,
                    &BodyStructureOptions {
                        upper_case_keys: true,
                        body_only: true,
                        ..BodyStructureOptions::default()
                    },
                );
                lex.verbatim("BODY ").verbatim(&field.to_wire());
            },
            FetchAtt::BodyStructure => {
                let field = body_structure(
                    &message.mime_tree,
                    &BodyStructureOptions {
                        upper_case_keys: true,
                        ..BodyStructureOptions::default()
                    },
                );
                lex.verbatim("BODYSTRUCTURE ").verbatim(&field.to_wire());
            },
            FetchAtt::BodySection { section, .. } => {
                let name = match section {
                    Section::Full => "BODY[]",
                    Section::Header => "BODY[HEADER]",
                    Section::Text => "BODY[TEXT]",
                };
                let data = self.section_bytes(message, *section);
                lex.verbatim(name).verbatim(" ").literal(&data);
            },
        }

        out
    }

    /// The message's flag set as this session sees it, including the
    /// session-local `\Recent`.
    fn session_flags(&self, message: &Message) -> Vec<String> {
        let mut flags = message.flags();
        let session_recent = self
            .selected
            .as_ref()
            .map_or(false, |s| s.recent.contains(&message.uid));
        if session_recent && !flags.iter().any(|f| "\\Recent" == f) {
            flags.push("\\Recent".to_owned());
        }
        flags
    }

    fn section_bytes(&self, message: &Message, section: Section) -> Vec<u8> {
        let resolve =
            |id: &str| -> Option<Vec<u8>> { self.blobs.get(id).ok() };

        match section {
            Section::Full => parser::serialize(&message.mime_tree, &resolve),
            Section::Header => {
                let mut out = Vec::new();
                for line in &message.mime_tree.header {
                    out.extend_from_slice(line.as_bytes());
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(b"\r\n");
                out
            },
            Section::Text => {
                let mut out = Vec::new();
                parser::write_content(&message.mime_tree, &resolve, &mut out);
                out
            },
        }
    }

    pub(super) fn cmd_store(
        &mut self,
        set: &SeqSet,
        mode: StoreMode,
        silent: bool,
        flags: &[Flag],
        uid: bool,
    ) -> CommandResponse {
        if self.selected.as_ref().unwrap().read_only {
            return CommandResponse::tagged(
                Tagged::no("Mailbox is read-only").with_code(Code::Cannot),
            );
        }

        let arrivals = self.poll_arrivals();
        let uids = self.resolve_set(set, uid);
        if uids.is_empty() {
            return CommandResponse {
                untagged: arrivals,
                tagged: Tagged::ok("STORE completed (no messages)"),
            };
        }

        let (add, remove): (Vec<Flag>, Vec<Flag>) = match mode {
            StoreMode::Add => (flags.to_vec(), Vec::new()),
            StoreMode::Remove => (Vec::new(), flags.to_vec()),
            StoreMode::Replace => (
                flags.to_vec(),
                Flag::ALL
                    .iter()
                    .copied()
                    .filter(|f| !flags.contains(f))
                    .collect(),
            ),
        };

        let mailbox_id = self.selected.as_ref().unwrap().mailbox.id.clone();
        let changed = match self
            .store
            .update_flags(&mailbox_id, &uids, &add, &remove)
        {
            Ok(changed) => changed,
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let mut untagged = arrivals;
        {
            let selected = self.selected.as_mut().unwrap();
            for change in &changed {
                selected.highest_modseq =
                    selected.highest_modseq.max(change.modseq);
            }
        }

        if !silent {
            let selected = self.selected.as_ref().unwrap();
            for change in &changed {
                let seqnum = match selected.seqnum_of(change.uid) {
                    Some(seqnum) => seqnum,
                    None => continue,
                };

                let mut flags = change.flags.clone();
                if selected.recent.contains(&change.uid)
                    && !flags.iter().any(|f| "\\Recent" == f)
                {
                    flags.push("\\Recent".to_owned());
                }

                let rendered = if uid {
                    format!(
                        "* {} FETCH (FLAGS ({}) UID {})",
                        seqnum,
                        flags.join(" "),
                        change.uid.get(),
                    )
                } else {
                    format!(
                        "* {} FETCH (FLAGS ({}))",
                        seqnum,
                        flags.join(" "),
                    )
                };
                untagged.push(rendered.into_bytes());
            }
        }

        CommandResponse {
            untagged,
            tagged: Tagged::ok("STORE completed"),
        }
    }
}
