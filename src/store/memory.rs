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

//! The in-memory reference implementation of `Store`.
//!
//! One mutex guards all state, which trivially provides the atomicity the
//! trait demands: an allocation or flag update is a single critical
//! section. Administrative operations (user and address creation) are
//! inherent methods rather than part of the trait; in production they
//! belong to the admin API, which is a separate program.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::model::*;
use super::{FlagsChanged, MessagePredicate, Store};
use crate::support::error::Error;
use crate::support::ids::{ArcClock, ArcIdSource};
use crate::support::safe_name::is_safe_path;

pub struct MemoryStore {
    state: Mutex<State>,
    clock: ArcClock,
    ids: ArcIdSource,
}

#[derive(Default)]
struct State {
    users: Vec<User>,
    addresses: Vec<AddressRecord>,
    mailboxes: Vec<Mailbox>,
    messages: HashMap<MailboxId, BTreeMap<u32, Message>>,
    filters: HashMap<UserId, Vec<Filter>>,
    uid_validity_floor: u32,
}

/// The mailboxes every new account starts with, besides INBOX.
const DEFAULT_MAILBOXES: &[(&str, SpecialUse)] = &[
    ("Sent", SpecialUse::Sent),
    ("Drafts", SpecialUse::Drafts),
    ("Junk", SpecialUse::Junk),
    ("Trash", SpecialUse::Trash),
];

impl MemoryStore {
    pub fn new(clock: ArcClock, ids: ArcIdSource) -> Self {
        MemoryStore {
            state: Mutex::new(State::default()),
            clock,
            ids,
        }
    }

    /// Creates a user with their primary address, INBOX, and the default
    /// special-use mailboxes.
    pub fn create_user(
        &self,
        name: &str,
        password: &str,
        address: &str,
    ) -> Result<User, Error> {
        let now = self.clock.now();
        let user = User {
            id: UserId(self.ids.generate()),
            name: name.to_owned(),
            password: hash_password(password),
            address: address.to_lowercase(),
            quota: 0,
            storage_used: 0,
            disabled: false,
            created: now,
        };

        let mut state = self.state.lock().unwrap();
        if state.users.iter().any(|u| u.name == name) {
            return Err(Error::StoreUnavailable(format!(
                "user {} already exists",
                name
            )));
        }

        state.addresses.push(AddressRecord {
            address: user.address.clone(),
            user: user.id.clone(),
            created: now,
        });

        let uid_validity = next_uid_validity(&mut state, now.timestamp());
        push_mailbox(
            &mut state,
            &self.ids,
            &user.id,
            "INBOX",
            Some(SpecialUse::Inbox),
            uid_validity,
            now,
        );
        for &(path, special_use) in DEFAULT_MAILBOXES {
            let uid_validity =
                next_uid_validity(&mut state, now.timestamp());
            push_mailbox(
                &mut state,
                &self.ids,
                &user.id,
                path,
                Some(special_use),
                uid_validity,
                now,
            );
        }

        state.users.push(user.clone());
        Ok(user)
    }

    /// Registers an additional address for an existing user.
    pub fn add_address(
        &self,
        user: &UserId,
        address: &str,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let address = address.to_lowercase();
        if state.addresses.iter().any(|a| a.address == address) {
            return Err(Error::StoreUnavailable(format!(
                "address {} already exists",
                address
            )));
        }
        state.addresses.push(AddressRecord {
            address,
            user: user.clone(),
            created: self.clock.now(),
        });
        Ok(())
    }

    pub fn add_filter(&self, user: &UserId, filter: Filter) {
        self.state
            .lock()
            .unwrap()
            .filters
            .entry(user.clone())
            .or_insert_with(Vec::new)
            .push(filter);
    }

    pub fn set_disabled(&self, user: &UserId, disabled: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(u) = state.users.iter_mut().find(|u| &u.id == user) {
            u.disabled = disabled;
        }
    }
}

fn next_uid_validity(state: &mut State, timestamp: i64) -> u32 {
    let v = (timestamp.max(1) as u32).max(state.uid_validity_floor);
    state.uid_validity_floor = v + 1;
    v
}

fn push_mailbox(
    state: &mut State,
    ids: &ArcIdSource,
    user: &UserId,
    path: &str,
    special_use: Option<SpecialUse>,
    uid_validity: u32,
    now: chrono::DateTime<chrono::Utc>,
) -> Mailbox {
    let mailbox = Mailbox {
        id: MailboxId(ids.generate()),
        user: user.clone(),
        path: path.to_owned(),
        special_use,
        subscribed: true,
        uid_validity,
        uid_next: 1,
        modify_index: Modseq(0),
        created: now,
    };
    state.messages.insert(mailbox.id.clone(), BTreeMap::new());
    state.mailboxes.push(mailbox.clone());
    mailbox
}

fn mailbox_mut<'a>(
    state: &'a mut State,
    id: &MailboxId,
) -> Result<&'a mut Mailbox, Error> {
    state
        .mailboxes
        .iter_mut()
        .find(|m| &m.id == id)
        .ok_or(Error::NxMailbox)
}

impl Store for MemoryStore {
    fn find_address(
        &self,
        address: &str,
    ) -> Result<Option<AddressRecord>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .addresses
            .iter()
            .find(|a| a.address == address)
            .cloned())
    }

    fn find_user(&self, id: &UserId) -> Result<Option<User>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| &u.id == id).cloned())
    }

    fn find_user_by_name(&self, name: &str) -> Result<Option<User>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.name == name).cloned())
    }

    fn find_mailbox(
        &self,
        user: &UserId,
        path: &str,
    ) -> Result<Option<Mailbox>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .mailboxes
            .iter()
            .find(|m| &m.user == user && m.path == path)
            .cloned())
    }

    fn find_mailbox_by_special_use(
        &self,
        user: &UserId,
        special_use: SpecialUse,
    ) -> Result<Option<Mailbox>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .mailboxes
            .iter()
            .find(|m| &m.user == user && Some(special_use) == m.special_use)
            .cloned())
    }

    fn list_mailboxes(
        &self,
        user: &UserId,
        subscribed_only: bool,
    ) -> Result<Vec<Mailbox>, Error> {
        let state = self.state.lock().unwrap();
        let mut mailboxes: Vec<Mailbox> = state
            .mailboxes
            .iter()
            .filter(|m| &m.user == user && (!subscribed_only || m.subscribed))
            .cloned()
            .collect();
        mailboxes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(mailboxes)
    }

    fn create_mailbox(
        &self,
        user: &UserId,
        path: &str,
        special_use: Option<SpecialUse>,
    ) -> Result<Mailbox, Error> {
        if !is_safe_path(path) {
            return Err(Error::UnsafeName);
        }

        let mut state = self.state.lock().unwrap();
        if state
            .mailboxes
            .iter()
            .any(|m| &m.user == user && m.path == path)
        {
            return Err(Error::MailboxExists);
        }

        let now = self.clock.now();
        let uid_validity = next_uid_validity(&mut state, now.timestamp());
        Ok(push_mailbox(
            &mut state,
            &self.ids,
            user,
            path,
            special_use,
            uid_validity,
            now,
        ))
    }

    fn delete_mailbox(&self, user: &UserId, path: &str) -> Result<(), Error> {
        if "INBOX" == path {
            return Err(Error::BadOperationOnInbox);
        }

        let mut state = self.state.lock().unwrap();
        let ix = state
            .mailboxes
            .iter()
            .position(|m| &m.user == user && m.path == path)
            .ok_or(Error::NxMailbox)?;

        if state.mailboxes[ix].special_use.is_some() {
            return Err(Error::BadOperationOnSpecialUse);
        }

        let mailbox = state.mailboxes.remove(ix);
        state.messages.remove(&mailbox.id);
        Ok(())
    }

    fn rename_mailbox(
        &self,
        user: &UserId,
        from: &str,
        to: &str,
    ) -> Result<(), Error> {
        if "INBOX" == from {
            return Err(Error::BadOperationOnInbox);
        }
        if from == to {
            return Err(Error::RenameToSelf);
        }
        if to.starts_with(&format!("{}/", from)) {
            return Err(Error::RenameIntoSelf);
        }
        if !is_safe_path(to) {
            return Err(Error::UnsafeName);
        }

        let mut state = self.state.lock().unwrap();
        if state
            .mailboxes
            .iter()
            .any(|m| &m.user == user && m.path == to)
        {
            return Err(Error::MailboxExists);
        }
        if !state
            .mailboxes
            .iter()
            .any(|m| &m.user == user && m.path == from)
        {
            return Err(Error::NxMailbox);
        }

        let prefix = format!("{}/", from);
        for mailbox in state
            .mailboxes
            .iter_mut()
            .filter(|m| &m.user == user)
        {
            if mailbox.path == from {
                mailbox.path = to.to_owned();
            } else if let Some(rest) = mailbox.path.strip_prefix(&prefix) {
                mailbox.path = format!("{}/{}", to, rest);
            }
        }
        Ok(())
    }

    fn set_subscribed(
        &self,
        user: &UserId,
        path: &str,
        subscribed: bool,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let mailbox = state
            .mailboxes
            .iter_mut()
            .find(|m| &m.user == user && m.path == path)
            .ok_or(Error::NxMailbox)?;
        mailbox.subscribed = subscribed;
        Ok(())
    }

    fn allocate_uid(&self, mailbox: &MailboxId) -> Result<Uid, Error> {
        let mut state = self.state.lock().unwrap();
        let mailbox = mailbox_mut(&mut state, mailbox)?;
        let uid = Uid::of(mailbox.uid_next).ok_or_else(|| {
            Error::StoreUnavailable("UIDNEXT corrupted".to_owned())
        })?;
        mailbox.uid_next += 1;
        mailbox.modify_index = mailbox.modify_index.next();
        Ok(uid)
    }

    fn insert_message(&self, mut message: Message) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();

        {
            let mailbox = mailbox_mut(&mut state, &message.mailbox)?;
            if message.uid.get() >= mailbox.uid_next {
                return Err(Error::StoreUnavailable(
                    "message UID was never allocated".to_owned(),
                ));
            }
            mailbox.modify_index = mailbox.modify_index.next();
            message.modseq = mailbox.modify_index;
        }

        let mailbox_id = message.mailbox.clone();
        let slot = state
            .messages
            .get_mut(&mailbox_id)
            .ok_or(Error::NxMailbox)?;
        if slot.contains_key(&message.uid.get()) {
            return Err(Error::StoreUnavailable(format!(
                "duplicate UID {} in {:?}",
                message.uid.get(),
                mailbox_id
            )));
        }
        slot.insert(message.uid.get(), message);
        Ok(())
    }

    fn update_flags(
        &self,
        mailbox: &MailboxId,
        uids: &[Uid],
        set: &[Flag],
        unset: &[Flag],
    ) -> Result<Vec<FlagsChanged>, Error> {
        let mut state = self.state.lock().unwrap();

        let mut modify_index =
            mailbox_mut(&mut state, mailbox)?.modify_index;

        let mut changed = Vec::new();
        {
            let messages = state
                .messages
                .get_mut(mailbox)
                .ok_or(Error::NxMailbox)?;
            for uid in uids {
                let message = match messages.get_mut(&uid.get()) {
                    Some(m) => m,
                    None => continue,
                };

                for &flag in set {
                    message.set_flag(flag, true);
                }
                for &flag in unset {
                    message.set_flag(flag, false);
                }

                modify_index = modify_index.next();
                message.modseq = modify_index;
                changed.push(FlagsChanged {
                    uid: *uid,
                    flags: message.flags(),
                    modseq: modify_index,
                });
            }
        }

        mailbox_mut(&mut state, mailbox)?.modify_index = modify_index;
        Ok(changed)
    }

    fn delete_messages(
        &self,
        mailbox: &MailboxId,
        predicate: &MessagePredicate,
    ) -> Result<usize, Error> {
        let mut state = self.state.lock().unwrap();

        let removed: Vec<u32> = {
            let messages = state
                .messages
                .get_mut(mailbox)
                .ok_or(Error::NxMailbox)?;
            let doomed: Vec<u32> = messages
                .values()
                .filter(|m| predicate.matches(m))
                .map(|m| m.uid.get())
                .collect();
            for uid in &doomed {
                messages.remove(uid);
            }
            doomed
        };

        if !removed.is_empty() {
            let mailbox = mailbox_mut(&mut state, mailbox)?;
            mailbox.modify_index = mailbox.modify_index.next();
        }

        Ok(removed.len())
    }

    fn query_messages(
        &self,
        mailbox: &MailboxId,
        predicate: &MessagePredicate,
    ) -> Result<Vec<Message>, Error> {
        let state = self.state.lock().unwrap();
        let messages = state.messages.get(mailbox).ok_or(Error::NxMailbox)?;
        Ok(messages
            .values()
            .filter(|m| predicate.matches(m))
            .cloned()
            .collect())
    }

    fn claim_recent(&self, mailbox: &MailboxId) -> Result<Vec<Uid>, Error> {
        let mut state = self.state.lock().unwrap();
        let messages = state
            .messages
            .get_mut(mailbox)
            .ok_or(Error::NxMailbox)?;

        let mut claimed = Vec::new();
        for message in messages.values_mut() {
            if message.recent {
                message.recent = false;
                claimed.push(message.uid);
            }
        }
        Ok(claimed)
    }

    fn update_storage_used(
        &self,
        user: &UserId,
        delta: i64,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|u| &u.id == user)
            .ok_or(Error::NxUser)?;
        if delta >= 0 {
            user.storage_used = user.storage_used.saturating_add(delta as u64);
        } else {
            user.storage_used =
                user.storage_used.saturating_sub((-delta) as u64);
        }
        Ok(())
    }

    fn list_filters(&self, user: &UserId) -> Result<Vec<Filter>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state.filters.get(user).cloned().unwrap_or_default())
    }
}
