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

//! Utilities for working with individual RFC 2822 header values.

use chrono::prelude::*;
use lazy_static::lazy_static;
use regex::Regex;

use super::encoded_word::ew_decode_unstructured;
use super::model::{Address, ValueParams};

lazy_static! {
    static ref FOLDING: Regex = Regex::new(r"\s*\r?\n\s*").unwrap();
    static ref TRAILING_COMMENT: Regex = Regex::new(r"\s*\([^)]*\)\s*$").unwrap();
}

/// Collapses folded line breaks (and the surrounding whitespace) in a header
/// value to a single space.
pub fn unfold(value: &str) -> String {
    FOLDING.replace_all(value, " ").into_owned()
}

/// Whether a header or parameter key is acceptable: non-empty, under 100
/// bytes, and beginning with a token character. Anything else is silently
/// dropped by the parser.
pub fn is_valid_key(key: &str) -> bool {
    key.len() < 100
        && key.bytes().next().map_or(false, |b| {
            b.is_ascii_alphanumeric() || b == b'-' || b == b'*'
        })
}

/// Parses a structured header value into value + parameters.
///
/// The value and any slashed type/subtype are lower-cased; parameter names
/// are lower-cased and their values stripped of surrounding quotes.
/// Parameter order is preserved.
pub fn parse_value_params(header_value: &str) -> ValueParams {
    let mut data = ValueParams::default();

    for (ix, part) in header_value.split(';').enumerate() {
        let part = part.trim();
        if 0 == ix {
            data.value = part.to_lowercase();
            match data.value.find('/') {
                Some(slash) => {
                    data.typ = data.value[..slash].to_owned();
                    data.subtype = data.value[slash + 1..].to_owned();
                },
                None => data.typ = data.value.clone(),
            }
        } else if let Some(eq) = part.find('=') {
            let key = part[..eq].trim().to_lowercase();
            let value = part[eq + 1..]
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .to_owned();
            if is_valid_key(&key) {
                data.params.push((key, value));
            }
        }
    }

    data
}

/// Parses an address-list header value into flat `{name, address}` records.
///
/// Group syntax is flattened to the member addresses. RFC 2047 encoded
/// words in display names are decoded. A malformed list yields an empty
/// vector, never an error.
pub fn parse_address_list(value: &str) -> Vec<Address> {
    let mut scanner = AddressScanner {
        bytes: value.as_bytes(),
        pos: 0,
    };
    scanner.address_list(false).unwrap_or_default()
}

struct AddressScanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> AddressScanner<'a> {
    fn address_list(&mut self, in_group: bool) -> Option<Vec<Address>> {
        let mut out = Vec::new();

        loop {
            self.skip_cfws();
            while self.eat(b',') {
                self.skip_cfws();
            }
            if self.at_end() {
                return if in_group { None } else { Some(out) };
            }
            if in_group && self.eat(b';') {
                return Some(out);
            }

            self.address(in_group, &mut out)?;
        }
    }

    /// Parses one address (or group) and appends its mailboxes to `out`.
    fn address(
        &mut self,
        in_group: bool,
        out: &mut Vec<Address>,
    ) -> Option<()> {
        let mut phrase: Vec<String> = Vec::new();

        loop {
            self.skip_cfws();
            match self.peek() {
                None => {
                    // A trailing bare addr-spec
                    return self.finish_bare(phrase, out);
                },
                Some(b'"') => phrase.push(self.quoted_string()?),
                Some(b'<') => {
                    let spec = self.angle_addr()?;
                    out.push(Address {
                        name: display_name(&phrase),
                        address: spec,
                    });
                    return Some(());
                },
                Some(b':') if !in_group => {
                    // Group: the phrase is the (discarded) group name;
                    // flatten the members.
                    self.pos += 1;
                    let members = self.address_list(true)?;
                    out.extend(members);
                    return Some(());
                },
                Some(b',') => {
                    return self.finish_bare(phrase, out);
                },
                Some(b';') if in_group => {
                    return self.finish_bare(phrase, out);
                },
                Some(_) => phrase.push(self.atom()?),
            }
        }
    }

    /// The accumulated phrase was not followed by `<` or `:`, so it must
    /// itself be a bare addr-spec.
    fn finish_bare(
        &mut self,
        phrase: Vec<String>,
        out: &mut Vec<Address>,
    ) -> Option<()> {
        let spec = phrase.concat();
        if spec.is_empty() {
            return Some(());
        }
        if !spec.contains('@') {
            return None;
        }
        out.push(Address {
            name: None,
            address: spec,
        });
        Some(())
    }

    fn angle_addr(&mut self) -> Option<String> {
        debug_assert_eq!(Some(b'<'), self.peek());
        self.pos += 1;

        let start = self.pos;
        while let Some(b) = self.peek() {
            if b'>' == b {
                let mut inner =
                    std::str::from_utf8(&self.bytes[start..self.pos])
                        .ok()?
                        .trim();
                self.pos += 1;

                // Obsolete routing: @hosta,@hostb:user@domain
                if inner.starts_with('@') {
                    inner = &inner[inner.find(':')? + 1..];
                }

                if inner.is_empty() || !inner.contains('@') {
                    return None;
                }
                return Some(inner.to_owned());
            }
            self.pos += 1;
        }
        None
    }

    fn quoted_string(&mut self) -> Option<String> {
        debug_assert_eq!(Some(b'"'), self.peek());
        self.pos += 1;

        let mut content = Vec::new();
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'"' => {
                    return Some(
                        String::from_utf8_lossy(&content).into_owned(),
                    )
                },
                b'\\' => {
                    if let Some(next) = self.peek() {
                        content.push(next);
                        self.pos += 1;
                    }
                },
                _ => content.push(b),
            }
        }
        None
    }

    /// A run of non-special bytes; dots and most punctuation stay inside so
    /// that both display-name words and addr-spec fragments scan as atoms.
    fn atom(&mut self) -> Option<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' | b'"' | b'<' | b'>' | b','
                | b':' | b';' | b'(' | b')' => break,
                _ => self.pos += 1,
            }
        }

        if start == self.pos {
            return None;
        }
        Some(
            String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned(),
        )
    }

    fn skip_cfws(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.pos += 1
                },
                Some(b'(') => {
                    let mut depth = 0usize;
                    while let Some(b) = self.peek() {
                        self.pos += 1;
                        match b {
                            b'(' => depth += 1,
                            b')' => {
                                depth -= 1;
                                if 0 == depth {
                                    break;
                                }
                            },
                            b'\\' => {
                                if self.peek().is_some() {
                                    self.pos += 1;
                                }
                            },
                            _ => (),
                        }
                    }
                },
                _ => return,
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if Some(b) == self.peek() {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

fn display_name(phrase: &[String]) -> Option<String> {
    if phrase.is_empty() {
        return None;
    }
    let joined = phrase.join(" ");
    let decoded = ew_decode_unstructured(&joined).into_owned();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

/// Parses an RFC 2822 date-time, tolerating the common malformations:
/// trailing comments like `(PDT)`, missing day-of-week, missing seconds.
pub fn parse_datetime(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = TRAILING_COMMENT.replace(value.trim(), "");
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt);
    }

    for format in &[
        "%d %b %Y %H:%M:%S %z",
        "%a, %d %b %Y %H:%M %z",
        "%d %b %Y %H:%M %z",
    ] {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }

    None
}

/// The raw Message-ID header value, trimmed.
pub fn parse_message_id(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

/// A Message-ID with the angle brackets stripped, for document fields.
pub fn strip_angles(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| c == '<' || c == '>')
        .to_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    fn addr(name: Option<&str>, address: &str) -> Address {
        Address {
            name: name.map(str::to_owned),
            address: address.to_owned(),
        }
    }

    #[test]
    fn value_params_parsing() {
        let vp = parse_value_params(
            "multipart/Mixed; Boundary=\"b o u n d\"; charset=utf-8",
        );
        assert_eq!("multipart/mixed", vp.value);
        assert_eq!("multipart", vp.typ);
        assert_eq!("mixed", vp.subtype);
        assert_eq!(Some("b o u n d"), vp.param("boundary"));
        assert_eq!(Some("utf-8"), vp.param("charset"));
        assert!(vp.has_params());

        let vp = parse_value_params("text/plain");
        assert_eq!("text", vp.typ);
        assert_eq!("plain", vp.subtype);
        assert!(!vp.has_params());

        let vp = parse_value_params("inline; filename='photo.jpg'");
        assert_eq!("inline", vp.value);
        assert_eq!(Some("photo.jpg"), vp.param("filename"));
    }

    #[test]
    fn simple_addresses() {
        assert_eq!(
            vec![addr(None, "foo@bar.com")],
            parse_address_list("foo@bar.com")
        );
        assert_eq!(
            vec![addr(Some("Foo Bar"), "foo@bar.com")],
            parse_address_list("Foo Bar <foo@bar.com>")
        );
        assert_eq!(
            vec![addr(Some("Foo, Bar"), "foo@bar.com")],
            parse_address_list("\"Foo, Bar\" <foo@bar.com>")
        );
        assert_eq!(
            vec![addr(None, "a@x.com"), addr(Some("B"), "b@y.com")],
            parse_address_list("a@x.com, B <b@y.com>")
        );
    }

    #[test]
    fn comments_and_routing() {
        assert_eq!(
            vec![addr(None, "foo@bar.com")],
            parse_address_list("foo@bar.com (work address)")
        );
        assert_eq!(
            vec![addr(None, "userc@d.bar.org")],
            parse_address_list("<@hosta.int,@jkl.org:userc@d.bar.org>")
        );
    }

    #[test]
    fn groups_flatten() {
        assert_eq!(
            vec![addr(None, "a@x.com"), addr(None, "b@y.com")],
            parse_address_list("Team: a@x.com, b@y.com;")
        );
        assert_eq!(
            Vec::<Address>::new(),
            parse_address_list("undisclosed-recipients:;")
        );
    }

    #[test]
    fn encoded_word_display_names() {
        assert_eq!(
            vec![addr(Some("föö"), "foo@bar.com")],
            parse_address_list("=?utf-8?b?ZsO2w7Y=?= <foo@bar.com>")
        );
    }

    #[test]
    fn malformed_lists_are_empty() {
        assert!(parse_address_list("total garbage").is_empty());
        assert!(parse_address_list("<notanaddress>").is_empty());
        assert!(parse_address_list("a@b.com, <broken").is_empty());
    }

    #[test]
    fn datetime_parsing() {
        let dt = parse_datetime("Mon, 14 May 2001 19:36:00 -0700 (PDT)")
            .unwrap();
        assert_eq!("Mon, 14 May 2001 19:36:00 -0700", dt.to_rfc2822());

        assert!(parse_datetime("14 May 2001 19:36:00 -0700").is_some());
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn message_ids() {
        assert_eq!(
            Some("<abc@def>".to_owned()),
            parse_message_id(" <abc@def> ")
        );
        assert_eq!("abc@def", strip_angles(" <abc@def> "));
        assert_eq!(None, parse_message_id("  "));
    }
}
