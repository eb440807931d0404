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

//! The persisted data model: users, addresses, mailboxes, messages, and
//! filters, shaped the way a document store holds them.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use crate::mime::envelope::Envelope;
use crate::mime::model::Part;

/// Uniquely identifies a message within a single mailbox.
///
/// UIDs start at 1 and increase strictly monotonically as messages are
/// added to the mailbox. UIDs are never reused while the mailbox lives.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

// Not useful in itself, but lets containers of Uid derive Default.
impl Default for Uid {
    fn default() -> Self {
        Uid::MIN
    }
}

impl Uid {
    pub const MIN: Self = unsafe { Uid(NonZeroU32::new_unchecked(1)) };
    pub const MAX: Self =
        unsafe { Uid(NonZeroU32::new_unchecked(u32::MAX)) };

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

/// The monotone per-mailbox change counter.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct Modseq(pub u64);

impl Modseq {
    pub fn next(self) -> Self {
        Modseq(self.0 + 1)
    }
}

#[derive(
    Deserialize,
    Serialize,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct UserId(pub String);

#[derive(
    Deserialize,
    Serialize,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct MailboxId(pub String);

/// The IMAP system flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Seen,
}

impl Flag {
    pub const ALL: &'static [Flag] = &[
        Flag::Answered,
        Flag::Deleted,
        Flag::Draft,
        Flag::Flagged,
        Flag::Seen,
    ];
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Seen => write!(f, "\\Seen"),
        }
    }
}

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        if "\\answered".eq_ignore_ascii_case(s) {
            Ok(Flag::Answered)
        } else if "\\deleted".eq_ignore_ascii_case(s) {
            Ok(Flag::Deleted)
        } else if "\\draft".eq_ignore_ascii_case(s) {
            Ok(Flag::Draft)
        } else if "\\flagged".eq_ignore_ascii_case(s) {
            Ok(Flag::Flagged)
        } else if "\\seen".eq_ignore_ascii_case(s) {
            Ok(Flag::Seen)
        } else {
            Err(())
        }
    }
}

/// Semantic mailbox roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialUse {
    Inbox,
    Sent,
    Drafts,
    Junk,
    Trash,
}

impl SpecialUse {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecialUse::Inbox => "\\Inbox",
            SpecialUse::Sent => "\\Sent",
            SpecialUse::Drafts => "\\Drafts",
            SpecialUse::Junk => "\\Junk",
            SpecialUse::Trash => "\\Trash",
        }
    }
}

impl fmt::Display for SpecialUse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecialUse {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        if "\\inbox".eq_ignore_ascii_case(s) {
            Ok(SpecialUse::Inbox)
        } else if "\\sent".eq_ignore_ascii_case(s) {
            Ok(SpecialUse::Sent)
        } else if "\\drafts".eq_ignore_ascii_case(s) {
            Ok(SpecialUse::Drafts)
        } else if "\\junk".eq_ignore_ascii_case(s) {
            Ok(SpecialUse::Junk)
        } else if "\\trash".eq_ignore_ascii_case(s) {
            Ok(SpecialUse::Trash)
        } else {
            Err(())
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// The unique login handle.
    pub name: String,
    /// The password verifier; see `hash_password`.
    pub password: String,
    /// Primary address, lowercased.
    pub address: String,
    /// Per-user storage quota in bytes; 0 falls back to the configured
    /// default.
    pub quota: u64,
    pub storage_used: u64,
    pub disabled: bool,
    pub created: DateTime<Utc>,
}

impl User {
    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(&self.password, password)
    }
}

const PBKDF2_ITERATIONS: usize = 100_000;

/// Produces a password verifier: `pbkdf2$<iterations>$<salt>$<hash>`, all
/// hex, SHA-256.
pub fn hash_password(password: &str) -> String {
    use rand::RngCore;

    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    hash_password_with_salt(password, &salt, PBKDF2_ITERATIONS)
}

fn hash_password_with_salt(
    password: &str,
    salt: &[u8],
    iterations: usize,
) -> String {
    let mut key = [0u8; 32];
    openssl::pkcs5::pbkdf2_hmac(
        password.as_bytes(),
        salt,
        iterations,
        openssl::hash::MessageDigest::sha256(),
        &mut key,
    )
    .expect("PBKDF2 failed");

    format!(
        "pbkdf2${}${}${}",
        iterations,
        crate::support::ids::hex(salt),
        crate::support::ids::hex(&key),
    )
}

pub fn verify_password(verifier: &str, password: &str) -> bool {
    let mut parts = verifier.split('$');
    let (scheme, iterations, salt, hash) = match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some(scheme), Some(iterations), Some(salt), Some(hash), None) => {
            (scheme, iterations, salt, hash)
        },
        _ => return false,
    };

    if "pbkdf2" != scheme {
        return false;
    }
    let iterations = match iterations.parse::<usize>() {
        Ok(n) if n > 0 && n <= 10_000_000 => n,
        _ => return false,
    };
    let salt = match unhex(salt) {
        Some(salt) => salt,
        None => return false,
    };

    let expected = hash_password_with_salt(password, &salt, iterations);
    expected.ends_with(hash) && 64 == hash.len()
}

fn unhex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|ix| u8::from_str_radix(&s[ix..ix + 2], 16).ok())
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddressRecord {
    /// The external address, lowercased and untagged. Unique.
    pub address: String,
    pub user: UserId,
    pub created: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: MailboxId,
    pub user: UserId,
    /// Hierarchical path with `/` separators. `INBOX` is reserved.
    pub path: String,
    pub special_use: Option<SpecialUse>,
    pub subscribed: bool,
    /// Set once at creation; changes only if the mailbox is recreated.
    pub uid_validity: u32,
    /// The UID the next inserted message receives. Never decreases.
    pub uid_next: u32,
    /// Bumped on any mutation visible through this mailbox.
    pub modify_index: Modseq,
    pub created: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Blob store id.
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub disposition: String,
    pub transfer_encoding: String,
    /// True when the part was inside `multipart/related`.
    pub related: bool,
    /// Decoded size, rounded up to whole KiB.
    pub size_kb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub user: UserId,
    pub mailbox: MailboxId,
    pub uid: Uid,
    pub modseq: Modseq,
    /// Size of the message as received, in bytes.
    pub size: u64,
    pub internal_date: DateTime<Utc>,

    // Flag columns. Seen and Deleted are stored inverted so that the
    // common queries ("unseen", "not yet expunged") select on true.
    pub unseen: bool,
    pub answered: bool,
    pub flagged: bool,
    pub undeleted: bool,
    pub draft: bool,
    pub recent: bool,

    pub envelope: Envelope,
    #[serde(default)]
    pub references: Vec<String>,

    /// The MIME tree, sufficient to reconstruct BODYSTRUCTURE and, with the
    /// blob store, the full wire form.
    pub mime_tree: Part,
    /// Extracted inline text.
    #[serde(default)]
    pub text: String,
    /// Extracted inline HTML parts.
    #[serde(default)]
    pub html: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl Message {
    pub fn test_flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::Answered => self.answered,
            Flag::Deleted => !self.undeleted,
            Flag::Draft => self.draft,
            Flag::Flagged => self.flagged,
            Flag::Seen => !self.unseen,
        }
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Answered => self.answered = value,
            Flag::Deleted => self.undeleted = !value,
            Flag::Draft => self.draft = value,
            Flag::Flagged => self.flagged = value,
            Flag::Seen => self.unseen = !value,
        }
    }

    /// The flag set in canonical order, with `\Recent` appended when the
    /// message is recent.
    pub fn flags(&self) -> Vec<String> {
        let mut flags: Vec<String> = Flag::ALL
            .iter()
            .copied()
            .filter(|&f| self.test_flag(f))
            .map(|f| f.to_string())
            .collect();
        if self.recent {
            flags.push("\\Recent".to_owned());
        }
        flags
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Filter {
    pub id: String,
    pub query: FilterQuery,
    pub action: FilterAction,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterQuery {
    /// Header name to pattern, matched as a case-insensitive substring of
    /// the serialised `name: value` line.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Positive requires attachments; negative requires none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_attachments: Option<i32>,
    /// Positive requires size ≥ n; negative requires size ≤ |n|.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Case-insensitive substring anywhere in the raw message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterAction {
    #[serde(default)]
    pub spam: bool,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub flag: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailbox: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flag_round_trip() {
        for &flag in Flag::ALL {
            assert_eq!(Ok(flag), flag.to_string().parse());
        }
        assert_eq!(Ok(Flag::Seen), "\\SEEN".parse());
        assert_matches!(Err(()), "\\Recent".parse::<Flag>());
        assert_matches!(Err(()), "Seen".parse::<Flag>());
    }

    #[test]
    fn message_flag_columns_invert_correctly() {
        let mut message = test_message();
        assert!(!message.test_flag(Flag::Seen));
        assert!(!message.test_flag(Flag::Deleted));

        message.set_flag(Flag::Seen, true);
        message.set_flag(Flag::Deleted, true);
        assert!(!message.unseen);
        assert!(!message.undeleted);
        assert_eq!(vec!["\\Deleted", "\\Seen", "\\Recent"], message.flags());
    }

    #[test]
    fn password_verification() {
        let verifier = hash_password("hunter2");
        assert!(verify_password(&verifier, "hunter2"));
        assert!(!verify_password(&verifier, "hunter3"));
        assert!(!verify_password("garbage", "hunter2"));
        assert!(!verify_password("pbkdf2$10$zz$zz", "hunter2"));
    }

    fn test_message() -> Message {
        Message {
            id: "0".repeat(24),
            user: UserId("u".to_owned()),
            mailbox: MailboxId("m".to_owned()),
            uid: Uid::MIN,
            modseq: Modseq(1),
            size: 100,
            internal_date: Utc.timestamp(0, 0),
            unseen: true,
            answered: false,
            flagged: false,
            undeleted: true,
            draft: false,
            recent: true,
            envelope: Default::default(),
            references: vec![],
            mime_tree: Default::default(),
            text: String::new(),
            html: vec![],
            attachments: vec![],
            expires: None,
        }
    }
}
