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

//! Local delivery: the per-recipient pipeline behind DATA.

use std::borrow::Cow;
use std::sync::Arc;

use log::{error, info, warn};

use super::codes::*;
use crate::filter::{self, Target};
use crate::index::{build_message, Indexer};
use crate::mime::parser;
use crate::store::blob::BlobStore;
use crate::store::model::{
    Filter, FilterAction, FilterQuery, Flag, SpecialUse, User,
};
use crate::store::Store;
use crate::support::ids::{ArcClock, ArcIdSource};
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::SystemConfig;

/// A validated recipient of the current transaction.
#[derive(Clone, Debug)]
pub struct Recipient {
    /// As given on the wire, normalised but with any `+tag` retained. This
    /// is what `Delivered-To` records.
    pub original: String,
    /// The untagged routing address.
    pub normalised: String,
    pub user: User,
}

/// Delivers one message to one recipient, independently of any other
/// recipient of the same transaction.
pub fn deliver_local(
    log_prefix: &LogPrefix,
    config: &SystemConfig,
    store: &Arc<dyn Store>,
    blobs: &Arc<dyn BlobStore>,
    clock: &ArcClock,
    ids: &ArcIdSource,
    recipient: &Recipient,
    raw: &[u8],
) -> Result<(), SmtpResponse> {
    let mut message_bytes =
        format!("Delivered-To: {}\r\n", recipient.original).into_bytes();
    message_bytes.extend_from_slice(raw);

    let message_id = ids.generate();
    let mut tree = parser::parse(&message_bytes);
    let indexer = Indexer::new(Arc::clone(blobs), Arc::clone(ids));
    let content =
        indexer.index(&mut tree, &message_id).map_err(|e| {
            error!("{} Indexing failed: {}", log_prefix, e);
            SmtpResponse(
                pc::ActionNotTakenTemporary,
                Some((cc::TempFail, sc::OtherMailSystem)),
                Cow::Borrowed("Failed to process message"),
            )
        })?;

    let mut filters = store
        .list_filters(&recipient.user.id)
        .unwrap_or_else(|e| {
            warn!("{} Failed to load filters: {}", log_prefix, e);
            Vec::new()
        });
    if !config.lmtp.spam_header.is_empty() {
        filters.push(spam_filter(&config.lmtp.spam_header));
    }

    let outcome = filter::evaluate(
        &filters,
        &message_bytes,
        !content.attachments.is_empty(),
    );
    if outcome.delete {
        info!(
            "{} Message for {} dropped by filter",
            log_prefix, recipient.normalised
        );
        return Ok(());
    }

    let quota = if recipient.user.quota > 0 {
        recipient.user.quota
    } else {
        config.imap.max_storage
    };
    if quota > 0
        && recipient.user.storage_used + message_bytes.len() as u64 > quota
    {
        return Err(SmtpResponse(
            pc::ExceededStorageAllocation,
            Some((cc::PermFail, sc::MailboxFull)),
            Cow::Borrowed("Mailbox is full"),
        ));
    }

    let mailbox = resolve_mailbox(store, recipient, &outcome.target)
        .map_err(|e| {
            error!("{} Mailbox resolution failed: {}", log_prefix, e);
            transient_store_error()
        })?;

    let uid = store.allocate_uid(&mailbox.id).map_err(|e| {
        error!("{} UID allocation failed: {}", log_prefix, e);
        transient_store_error()
    })?;

    let mut message = build_message(
        message_id,
        recipient.user.id.clone(),
        mailbox.id.clone(),
        uid,
        message_bytes.len() as u64,
        clock.now(),
        tree,
        content,
    );
    if outcome.seen {
        message.set_flag(Flag::Seen, true);
    }
    if outcome.flagged {
        message.set_flag(Flag::Flagged, true);
    }

    let size = message.size;
    store.insert_message(message).map_err(|e| {
        error!("{} Message insert failed: {}", log_prefix, e);
        transient_store_error()
    })?;

    // Fire-and-forget quota accounting
    if let Err(e) =
        store.update_storage_used(&recipient.user.id, size as i64)
    {
        warn!(
            "{} Failed to update storage accounting for {}: {}",
            log_prefix, recipient.normalised, e
        );
    }

    info!(
        "{} Delivered {} octets to {} ({}) as UID {}",
        log_prefix,
        size,
        recipient.normalised,
        mailbox.path,
        uid.get(),
    );
    Ok(())
}

/// The built-in filter derived from `lmtp.spam_header`: a `yes` value
/// routes to the junk mailbox.
fn spam_filter(header: &str) -> Filter {
    Filter {
        id: "SPAM".to_owned(),
        query: FilterQuery {
            headers: vec![(header.to_lowercase(), "yes".to_owned())],
            ..FilterQuery::default()
        },
        action: FilterAction {
            spam: true,
            ..FilterAction::default()
        },
    }
}

/// Resolves the delivery target: special-use for spam, path otherwise,
/// with INBOX as the fallback when the target does not exist.
fn resolve_mailbox(
    store: &Arc<dyn Store>,
    recipient: &Recipient,
    target: &Option<Target>,
) -> Result<crate::store::model::Mailbox, crate::support::error::Error> {
    let user = &recipient.user.id;

    let found = match target {
        Some(Target::Junk) => {
            store.find_mailbox_by_special_use(user, SpecialUse::Junk)?
        },
        Some(Target::Path(path)) => store.find_mailbox(user, path)?,
        None => store.find_mailbox(user, "INBOX")?,
    };

    match found {
        Some(mailbox) => Ok(mailbox),
        None => store
            .find_mailbox(user, "INBOX")?
            .ok_or(crate::support::error::Error::NxMailbox),
    }
}

pub fn transient_store_error() -> SmtpResponse {
    SmtpResponse(
        pc::ActionNotTakenTemporary,
        Some((cc::TempFail, sc::OtherMailSystem)),
        Cow::Borrowed("Temporary storage problem"),
    )
}
