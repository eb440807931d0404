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

//! Delivery-time filter evaluation.
//!
//! A filter's predicate is a conjunction; its actions compose across
//! filters in evaluation order. A later `mailbox` overrides an earlier
//! target; `delete` is terminal.

use log::info;

use crate::store::model::Filter;

/// Where a delivered message should land.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// The recipient's `\Junk` special-use mailbox.
    Junk,
    /// A mailbox by path.
    Path(String),
}

/// The composed result of evaluating all filters against one message.
#[derive(Clone, Debug, Default)]
pub struct FilterOutcome {
    pub target: Option<Target>,
    pub seen: bool,
    pub flagged: bool,
    pub delete: bool,
    /// Ids of the filters that matched, for the delivery log.
    pub matched: Vec<String>,
}

pub fn evaluate(
    filters: &[Filter],
    raw: &[u8],
    has_attachments: bool,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    let lowered = String::from_utf8_lossy(raw).to_lowercase();
    let headers = header_block(&lowered);

    for filter in filters {
        if !matches(filter, raw, &lowered, headers, has_attachments) {
            continue;
        }

        info!("Filter {} matched", filter.id);
        outcome.matched.push(filter.id.clone());

        if filter.action.spam {
            outcome.target = Some(Target::Junk);
        }
        if filter.action.seen {
            outcome.seen = true;
        }
        if filter.action.flag {
            outcome.flagged = true;
        }
        if filter.action.delete {
            outcome.delete = true;
            break;
        }
        if let Some(ref mailbox) = filter.action.mailbox {
            if !mailbox.is_empty() {
                outcome.target = Some(Target::Path(mailbox.clone()));
            }
        }
    }

    outcome
}

fn matches(
    filter: &Filter,
    raw: &[u8],
    lowered: &str,
    headers: &str,
    has_attachments: bool,
) -> bool {
    for (name, pattern) in &filter.query.headers {
        if !header_matches(headers, name, pattern) {
            return false;
        }
    }

    if let Some(ha) = filter.query.has_attachments {
        if ha > 0 && !has_attachments {
            return false;
        }
        if ha < 0 && has_attachments {
            return false;
        }
    }

    if let Some(size) = filter.query.size {
        let message_size = raw.len() as i64;
        if size > 0 && message_size < size {
            return false;
        }
        if size < 0 && message_size > -size {
            return false;
        }
    }

    if let Some(ref text) = filter.query.text {
        if !lowered.contains(&text.to_lowercase()) {
            return false;
        }
    }

    true
}

/// The header block of a message: everything before the first blank line.
/// Header predicates must never see body lines that merely look like
/// headers.
fn header_block(message: &str) -> &str {
    let end = match (message.find("\r\n\r\n"), message.find("\n\n")) {
        (Some(crlf), Some(lf)) => crlf.min(lf),
        (Some(crlf), None) => crlf,
        (None, Some(lf)) => lf,
        (None, None) => message.len(),
    };
    &message[..end]
}

/// Case-insensitive substring match of `pattern` against any serialised
/// `name: value` line of the header block.
fn header_matches(headers: &str, name: &str, pattern: &str) -> bool {
    let prefix = format!("{}:", name.to_lowercase());
    let pattern = pattern.to_lowercase();

    headers
        .lines()
        .filter(|line| line.starts_with(&prefix))
        .any(|line| line.contains(&pattern))
}
