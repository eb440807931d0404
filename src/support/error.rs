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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsafe mailbox name")]
    UnsafeName,
    #[error("No such user")]
    NxUser,
    #[error("No such mailbox")]
    NxMailbox,
    #[error("Mailbox already exists")]
    MailboxExists,
    #[error("Operation not allowed for INBOX")]
    BadOperationOnInbox,
    #[error("Operation not allowed on special-use mailbox")]
    BadOperationOnSpecialUse,
    #[error("Non-existent message")]
    NxMessage,
    #[error("Storage quota exceeded")]
    OverQuota,
    #[error("Mailbox read-only")]
    MailboxReadOnly,
    #[error("Rename source and destination are the same")]
    RenameToSelf,
    #[error("Rename destination is child of self")]
    RenameIntoSelf,
    #[error("No such blob")]
    NxBlob,
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("TLS is not available on this connection")]
    TlsNotAvailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
