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

//! The mailbox store abstraction.
//!
//! The protocol engines never talk to a database directly; they go through
//! `Store`, which a backing engine implements with the atomicity noted on
//! each operation. `MemoryStore` is the reference implementation used by
//! the tests and the demo server.

pub mod blob;
pub mod memory;
pub mod model;

use crate::support::error::Error;

use self::model::{
    AddressRecord, Filter, Flag, Mailbox, MailboxId, Message, Modseq,
    SpecialUse, Uid, User, UserId,
};

/// A message selector for queries and deletions.
#[derive(Clone, Debug, Default)]
pub struct MessagePredicate {
    /// Restrict to these UIDs.
    pub uids: Option<Vec<Uid>>,
    /// Restrict on the `\Deleted` flag.
    pub deleted: Option<bool>,
    /// Only messages whose modseq is strictly above this.
    pub modseq_above: Option<Modseq>,
}

impl MessagePredicate {
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(ref uids) = self.uids {
            if !uids.contains(&message.uid) {
                return false;
            }
        }
        if let Some(deleted) = self.deleted {
            if message.undeleted != !deleted {
                return false;
            }
        }
        if let Some(above) = self.modseq_above {
            if message.modseq <= above {
                return false;
            }
        }
        true
    }
}

/// The result of a flag mutation on one message.
#[derive(Clone, Debug)]
pub struct FlagsChanged {
    pub uid: Uid,
    pub flags: Vec<String>,
    pub modseq: Modseq,
}

pub trait Store: Send + Sync {
    /// Resolves an external address to its record, or `None` when unknown.
    fn find_address(&self, address: &str)
        -> Result<Option<AddressRecord>, Error>;

    fn find_user(&self, id: &UserId) -> Result<Option<User>, Error>;

    fn find_user_by_name(&self, name: &str) -> Result<Option<User>, Error>;

    fn find_mailbox(
        &self,
        user: &UserId,
        path: &str,
    ) -> Result<Option<Mailbox>, Error>;

    fn find_mailbox_by_special_use(
        &self,
        user: &UserId,
        special_use: SpecialUse,
    ) -> Result<Option<Mailbox>, Error>;

    fn list_mailboxes(
        &self,
        user: &UserId,
        subscribed_only: bool,
    ) -> Result<Vec<Mailbox>, Error>;

    fn create_mailbox(
        &self,
        user: &UserId,
        path: &str,
        special_use: Option<SpecialUse>,
    ) -> Result<Mailbox, Error>;

    /// Deleting `INBOX` or a special-use mailbox fails.
    fn delete_mailbox(&self, user: &UserId, path: &str) -> Result<(), Error>;

    /// Renames a mailbox and all its inferiors. `INBOX` cannot be renamed.
    fn rename_mailbox(
        &self,
        user: &UserId,
        from: &str,
        to: &str,
    ) -> Result<(), Error>;

    fn set_subscribed(
        &self,
        user: &UserId,
        path: &str,
        subscribed: bool,
    ) -> Result<(), Error>;

    /// Atomically increments `UIDNEXT` and the modify index, returning the
    /// pre-increment `UIDNEXT`. No two concurrent allocations return the
    /// same value.
    fn allocate_uid(&self, mailbox: &MailboxId) -> Result<Uid, Error>;

    /// Inserts a message under its pre-allocated UID. The store assigns the
    /// modseq.
    fn insert_message(&self, message: Message) -> Result<(), Error>;

    /// Atomic per message; bumps the modify index and returns the new flag
    /// set of every changed message.
    fn update_flags(
        &self,
        mailbox: &MailboxId,
        uids: &[Uid],
        set: &[Flag],
        unset: &[Flag],
    ) -> Result<Vec<FlagsChanged>, Error>;

    /// Removes matching messages, returning how many went away.
    fn delete_messages(
        &self,
        mailbox: &MailboxId,
        predicate: &MessagePredicate,
    ) -> Result<usize, Error>;

    /// Matching messages in ascending UID order.
    fn query_messages(
        &self,
        mailbox: &MailboxId,
        predicate: &MessagePredicate,
    ) -> Result<Vec<Message>, Error>;

    /// Atomically returns the UIDs currently flagged `\Recent` and clears
    /// the flag, so exactly one session observes each message as recent.
    fn claim_recent(&self, mailbox: &MailboxId) -> Result<Vec<Uid>, Error>;

    /// Best-effort quota accounting; callers log failures and move on.
    fn update_storage_used(
        &self,
        user: &UserId,
        delta: i64,
    ) -> Result<(), Error>;

    fn list_filters(&self, user: &UserId) -> Result<Vec<Filter>, Error>;
}
