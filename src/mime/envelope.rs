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

//! The RFC 3501 `ENVELOPE` structure, extracted from a parsed tree.

use serde::{Deserialize, Serialize};

use super::encoded_word::ew_decode_unstructured;
use super::model::{Address, Field, HeaderValue, Part};

/// The fixed ENVELOPE 10-tuple, in emission order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The `Date` header, verbatim.
    pub date: Option<String>,
    /// The `Subject` header, decoded.
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    /// The `In-Reply-To` header, trimmed.
    pub in_reply_to: Option<String>,
    /// The `Message-ID` header, trimmed.
    pub message_id: Option<String>,
}

impl Envelope {
    pub fn extract(part: &Part) -> Envelope {
        let headers = &part.parsed_header;

        Envelope {
            date: headers.get_text("date").map(|s| s.trim().to_owned()),
            subject: headers
                .get_text("subject")
                .map(|s| ew_decode_unstructured(s).into_owned()),
            from: addresses(headers.get("from")),
            sender: addresses(headers.get("sender")),
            reply_to: addresses(headers.get("reply-to")),
            to: addresses(headers.get("to")),
            cc: addresses(headers.get("cc")),
            bcc: addresses(headers.get("bcc")),
            in_reply_to: headers
                .get_text("in-reply-to")
                .map(|s| s.trim().to_owned()),
            message_id: headers
                .get_text("message-id")
                .map(|s| s.trim().to_owned()),
        }
    }

    /// The descriptor form, ready for wire serialisation.
    pub fn to_field(&self) -> Field {
        Field::List(vec![
            Field::from_opt(self.date.clone()),
            Field::from_opt(self.subject.clone()),
            address_list_field(&self.from),
            address_list_field(&self.sender),
            address_list_field(&self.reply_to),
            address_list_field(&self.to),
            address_list_field(&self.cc),
            address_list_field(&self.bcc),
            Field::from_opt(self.in_reply_to.clone()),
            Field::from_opt(self.message_id.clone()),
        ])
    }
}

fn addresses(value: Option<&HeaderValue>) -> Vec<Address> {
    value
        .and_then(HeaderValue::as_addresses)
        .map(<[Address]>::to_vec)
        .unwrap_or_default()
}

/// An address list as the nested `(personal source-route mailbox host)`
/// tuples; an absent list is NIL.
pub fn address_list_field(addrs: &[Address]) -> Field {
    if addrs.is_empty() {
        return Field::Nil;
    }

    Field::List(
        addrs
            .iter()
            .map(|addr| {
                let (local, domain) = addr.split();
                Field::List(vec![
                    Field::from_opt(addr.name.clone()),
                    Field::Nil,
                    Field::Str(local.to_owned()),
                    Field::Str(domain.to_owned()),
                ])
            })
            .collect(),
    )
}
