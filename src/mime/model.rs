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

//! The parsed-message object model shared by the parser, the descriptor
//! builders, the indexer, and the message documents in the store.

use serde::{Deserialize, Serialize};

/// A single decoded mailbox address. Group syntax is flattened to its member
/// addresses when header values are parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// The display name, decoded, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The bare `local@domain` address.
    pub address: String,
}

impl Address {
    /// Splits into `(local, domain)`, with an empty domain when there is no
    /// `@`, the way the ENVELOPE emitter wants it.
    pub fn split(&self) -> (&str, &str) {
        match self.address.rfind('@') {
            Some(ix) => (&self.address[..ix], &self.address[ix + 1..]),
            None => (&self.address[..], ""),
        }
    }
}

/// A structured header value: the bare value plus its semicolon-separated
/// parameters, in the order they appeared.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueParams {
    /// The full value before the first `;`, e.g. `text/plain`.
    pub value: String,
    /// For slashed values, the lower-cased part before the slash.
    pub typ: String,
    /// For slashed values, the part after the first slash.
    pub subtype: String,
    /// Parameters in insertion order, names lower-cased, quotes stripped.
    pub params: Vec<(String, String)>,
}

impl ValueParams {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }
}

/// A parsed header value.
///
/// Each header name maps to exactly one of these; which variant depends on
/// the field. Repeated unstructured headers accumulate into `List`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderValue {
    Text(String),
    List(Vec<String>),
    Params(ValueParams),
    Addresses(Vec<Address>),
}

impl HeaderValue {
    /// The scalar text of this value: the text itself, the last element of a
    /// list, or the bare value of a structured header.
    pub fn as_text(&self) -> Option<&str> {
        match *self {
            HeaderValue::Text(ref s) => Some(s),
            HeaderValue::List(ref l) => l.last().map(String::as_str),
            HeaderValue::Params(ref vp) => Some(&vp.value),
            HeaderValue::Addresses(..) => None,
        }
    }

    pub fn as_params(&self) -> Option<&ValueParams> {
        match *self {
            HeaderValue::Params(ref vp) => Some(vp),
            _ => None,
        }
    }

    pub fn as_addresses(&self) -> Option<&[Address]> {
        match *self {
            HeaderValue::Addresses(ref a) => Some(a),
            _ => None,
        }
    }
}

/// An ordered header map keyed by lower-cased name.
///
/// Order is preserved because descriptor emission must be deterministic in
/// header/parameter insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, HeaderValue)>);

impl Headers {
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::as_text)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces the value under `name`, or appends it if absent.
    pub fn set(&mut self, name: &str, value: HeaderValue) {
        match self.0.iter().position(|(k, _)| k == name) {
            Some(ix) => self.0[ix].1 = value,
            None => self.0.push((name.to_owned(), value)),
        }
    }

    /// Accumulates a raw text value: first occurrence is `Text`, repeats
    /// promote to `List` in arrival order.
    pub fn accumulate(&mut self, name: &str, value: String) {
        let ix = match self.0.iter().position(|(k, _)| k == name) {
            Some(ix) => ix,
            None => {
                self.0.push((name.to_owned(), HeaderValue::Text(value)));
                return;
            },
        };

        let slot = &mut self.0[ix].1;
        let replacement = match slot {
            HeaderValue::Text(prev) => {
                HeaderValue::List(vec![prev.clone(), value])
            },
            HeaderValue::List(list) => {
                list.push(value);
                return;
            },
            // Structured values are single-valued; last wins.
            _ => HeaderValue::Text(value),
        };
        *slot = replacement;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One node of the parsed MIME tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// Raw header lines as received, with folded continuations joined to
    /// their first line by CRLF.
    #[serde(default)]
    pub header: Vec<String>,
    /// Parsed headers, keyed by lower-cased name.
    #[serde(default)]
    pub parsed_header: Headers,
    /// Body bytes with line endings normalised to CRLF. Cleared when the
    /// body has been externalised to the blob store.
    #[serde(default)]
    pub body: Vec<u8>,
    /// The multipart subtype, when this node is a multipart with a usable
    /// boundary parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart: Option<String>,
    /// The boundary delimiting this node's children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<String>,
    /// Number of lines in the body as parsed.
    #[serde(default)]
    pub line_count: u32,
    /// Body length in bytes after CRLF normalisation.
    #[serde(default)]
    pub size: u32,
    /// Child parts, for multiparts.
    #[serde(default)]
    pub children: Vec<Part>,
    /// The embedded message, for `message/rfc822` parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Box<Part>>,
    /// Blob id of the externalised body, set by the indexer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

impl Part {
    /// The effective content type, defaulting to `text/plain`.
    pub fn content_type(&self) -> ValueParams {
        match self.parsed_header.get("content-type") {
            Some(HeaderValue::Params(vp)) => vp.clone(),
            _ => ValueParams {
                value: "text/plain".to_owned(),
                typ: "text".to_owned(),
                subtype: "plain".to_owned(),
                params: Vec::new(),
            },
        }
    }

    /// The lower-cased disposition value, or empty when absent.
    pub fn disposition(&self) -> String {
        match self.parsed_header.get("content-disposition") {
            Some(HeaderValue::Params(vp)) => vp.value.to_lowercase(),
            Some(v) => v.as_text().unwrap_or("").to_lowercase(),
            None => String::new(),
        }
    }

    /// The lower-cased transfer encoding, defaulting to `7bit`.
    pub fn transfer_encoding(&self) -> String {
        self.parsed_header
            .get_text("content-transfer-encoding")
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|| "7bit".to_owned())
    }

    /// The declared charset, defaulting to utf-8.
    pub fn charset(&self) -> String {
        self.content_type()
            .param("charset")
            .unwrap_or("utf-8")
            .to_owned()
    }

    /// The Content-ID with angle brackets stripped, or empty.
    pub fn content_id(&self) -> String {
        self.parsed_header
            .get_text("content-id")
            .map(|s| s.trim().trim_matches(|c| c == '<' || c == '>').to_owned())
            .unwrap_or_default()
    }
}

/// A generic descriptor field, the common shape of ENVELOPE and
/// BODY/BODYSTRUCTURE before wire serialisation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    Nil,
    Str(String),
    Num(u64),
    List(Vec<Field>),
}

impl Field {
    pub fn from_opt(value: Option<String>) -> Field {
        value.map(Field::Str).unwrap_or(Field::Nil)
    }

    /// Renders the IMAP wire form: `NIL` for nil and for empty lists,
    /// quoted strings with `\\` and `\"` escapes, bare integers, and
    /// parenthesised space-separated lists.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        self.write_wire(&mut out);
        out
    }

    fn write_wire(&self, out: &mut String) {
        match *self {
            Field::Nil => out.push_str("NIL"),
            Field::Num(n) => out.push_str(&n.to_string()),
            Field::Str(ref s) => {
                out.push('"');
                for ch in s.chars() {
                    if '"' == ch || '\\' == ch {
                        out.push('\\');
                    }
                    out.push(ch);
                }
                out.push('"');
            },
            Field::List(ref items) => {
                if items.is_empty() {
                    out.push_str("NIL");
                    return;
                }

                out.push('(');
                for (ix, item) in items.iter().enumerate() {
                    if ix > 0 {
                        out.push(' ');
                    }
                    item.write_wire(out);
                }
                out.push(')');
            },
        }
    }
}
