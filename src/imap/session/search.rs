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

//! SEARCH: a flat conjunction of keys evaluated over the selected
//! mailbox's messages.

use chrono::prelude::*;

use super::{store_error, CommandProcessor, Selected};
use crate::imap::response::{CommandResponse, Tagged};
use crate::imap::syntax::SearchKey;
use crate::mime::model::Address;
use crate::mime::parser;
use crate::store::model::Message;
use crate::store::MessagePredicate;

impl CommandProcessor {
    pub(super) fn cmd_search(
        &mut self,
        keys: &[SearchKey],
        uid: bool,
    ) -> CommandResponse {
        let mut untagged = self.poll_arrivals();
        let mailbox_id = self.selected.as_ref().unwrap().mailbox.id.clone();
        let messages = match self
            .store
            .query_messages(&mailbox_id, &MessagePredicate::default())
        {
            Ok(m) => m,
            Err(e) => return CommandResponse::tagged(store_error(&e)),
        };

        let selected = self.selected.as_ref().unwrap();
        let resolve =
            |id: &str| -> Option<Vec<u8>> { self.blobs.get(id).ok() };

        let mut hits = Vec::new();
        for message in &messages {
            let seqnum = match selected.seqnum_of(message.uid) {
                Some(seqnum) => seqnum,
                None => continue,
            };

            if keys
                .iter()
                .all(|key| key_matches(key, message, seqnum, selected, &resolve))
            {
                hits.push(if uid { message.uid.get() } else { seqnum });
            }
        }
        hits.sort_unstable();

        let mut line = b"* SEARCH".to_vec();
        for hit in hits {
            line.extend_from_slice(format!(" {}", hit).as_bytes());
        }
        untagged.push(line);

        CommandResponse {
            untagged,
            tagged: Tagged::ok("SEARCH completed"),
        }
    }
}

fn key_matches(
    key: &SearchKey,
    message: &Message,
    seqnum: u32,
    selected: &Selected,
    resolve: &dyn Fn(&str) -> Option<Vec<u8>>,
) -> bool {
    let recent = selected.recent.contains(&message.uid);

    match key {
        SearchKey::All => true,
        SearchKey::Answered => message.answered,
        SearchKey::Unanswered => !message.answered,
        SearchKey::Deleted => !message.undeleted,
        SearchKey::Undeleted => message.undeleted,
        SearchKey::Flagged => message.flagged,
        SearchKey::Unflagged => !message.flagged,
        SearchKey::Seen => !message.unseen,
        SearchKey::Unseen => message.unseen,
        SearchKey::New => recent && message.unseen,
        SearchKey::Old => !recent,
        SearchKey::Recent => recent,
        SearchKey::Draft => message.draft,
        SearchKey::Undraft => !message.draft,

        SearchKey::From(pattern) => {
            addresses_contain(&message.envelope.from, pattern)
        },
        SearchKey::To(pattern) => {
            addresses_contain(&message.envelope.to, pattern)
        },
        SearchKey::Cc(pattern) => {
            addresses_contain(&message.envelope.cc, pattern)
        },
        SearchKey::Bcc(pattern) => {
            addresses_contain(&message.envelope.bcc, pattern)
        },
        SearchKey::Subject(pattern) => message
            .envelope
            .subject
            .as_deref()
            .map_or(false, |s| contains_ci(s, pattern)),

        SearchKey::Body(pattern) => {
            let mut content = Vec::new();
            parser::write_content(&message.mime_tree, resolve, &mut content);
            contains_ci(&String::from_utf8_lossy(&content), pattern)
        },
        SearchKey::Text(pattern) => {
            let raw = parser::serialize(&message.mime_tree, resolve);
            contains_ci(&String::from_utf8_lossy(&raw), pattern)
        },
        SearchKey::Header(name, pattern) => {
            let prefix = format!("{}:", name.to_lowercase());
            message.mime_tree.header.iter().any(|line| {
                let lowered = line.to_lowercase();
                lowered.starts_with(&prefix)
                    && lowered.contains(&pattern.to_lowercase())
            })
        },

        SearchKey::Larger(n) => message.size > *n,
        SearchKey::Smaller(n) => message.size < *n,

        SearchKey::Uid(set) => {
            set.contains(message.uid.get(), selected.max_uid())
        },
        SearchKey::SeqNums(set) => {
            set.contains(seqnum, selected.uids.len() as u32)
        },

        // Date comparisons use the internal date at midnight UTC
        SearchKey::Before(date) => {
            message.internal_date.naive_utc().date() < *date
        },
        SearchKey::On(date) => {
            message.internal_date.naive_utc().date() == *date
        },
        SearchKey::Since(date) => {
            message.internal_date.naive_utc().date() >= *date
        },
    }
}

fn addresses_contain(addresses: &[Address], pattern: &str) -> bool {
    addresses.iter().any(|address| {
        contains_ci(&address.address, pattern)
            || address
                .name
                .as_deref()
                .map_or(false, |name| contains_ci(name, pattern))
    })
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
