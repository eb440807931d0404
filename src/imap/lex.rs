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

//! Utilities for *writing* values under IMAP's lexical rules.
//!
//! The main decision is which form to use for a string: atom, quoted
//! string, or literal. We are conservative: atoms only for `a-zA-Z0-9+_.-`
//! runs that are not "NIL", quoted strings only for short values free of
//! controls, backslash, and double quotes, literals for everything else.
//! Mallard speaks UTF-8 on the wire, so non-ASCII needs no repair.

use chrono::prelude::*;

/// Appends IMAP-lexed values to a response line under construction.
pub struct LexWriter<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> LexWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        LexWriter { out }
    }

    pub fn verbatim(&mut self, s: &str) -> &mut Self {
        self.out.extend_from_slice(s.as_bytes());
        self
    }

    pub fn sp(&mut self) -> &mut Self {
        self.out.push(b' ');
        self
    }

    pub fn nil(&mut self) -> &mut Self {
        self.verbatim("NIL")
    }

    pub fn num(&mut self, value: u32) -> &mut Self {
        self.verbatim(&value.to_string())
    }

    pub fn num_u64(&mut self, value: u64) -> &mut Self {
        self.verbatim(&value.to_string())
    }

    /// A string in astring position: atom when safe, else quoted/literal.
    pub fn astring(&mut self, s: &str) -> &mut Self {
        if is_conservative_atom(s) {
            self.verbatim(s)
        } else {
            self.string(s)
        }
    }

    /// A string in string position: quoted when possible, else literal.
    pub fn string(&mut self, s: &str) -> &mut Self {
        if is_quotable(s) {
            self.out.push(b'"');
            self.out.extend_from_slice(s.as_bytes());
            self.out.push(b'"');
            self
        } else {
            self.literal(s.as_bytes())
        }
    }

    pub fn nstring(&mut self, s: &Option<impl AsRef<str>>) -> &mut Self {
        match s {
            None => self.nil(),
            Some(s) => self.string(s.as_ref()),
        }
    }

    pub fn mailbox(&mut self, path: &str) -> &mut Self {
        self.astring(path)
    }

    /// A literal: size-prefixed raw octets.
    pub fn literal(&mut self, data: &[u8]) -> &mut Self {
        self.out
            .extend_from_slice(format!("{{{}}}\r\n", data.len()).as_bytes());
        self.out.extend_from_slice(data);
        self
    }

    /// A parenthesised flag list.
    pub fn flags(&mut self, flags: &[String]) -> &mut Self {
        self.out.push(b'(');
        for (ix, flag) in flags.iter().enumerate() {
            if ix > 0 {
                self.out.push(b' ');
            }
            self.out.extend_from_slice(flag.as_bytes());
        }
        self.out.push(b')');
        self
    }

    /// INTERNALDATE format: `"_d-Mon-YYYY HH:MM:SS +ZZZZ"`.
    pub fn datetime(&mut self, datetime: &DateTime<Utc>) -> &mut Self {
        self.verbatim(&format!(
            "\"{}\"",
            datetime.format("%_d-%b-%Y %H:%M:%S +0000")
        ))
    }
}

fn is_conservative_atom(s: &str) -> bool {
    !"nil".eq_ignore_ascii_case(s)
        && !s.is_empty()
        && s.bytes().all(|b| {
            matches!(
                b,
                b'a'..=b'z'
                | b'A'..=b'Z'
                | b'0'..=b'9'
                | b'+'
                | b'_'
                | b'.'
                | b'-'
            )
        })
}

fn is_quotable(s: &str) -> bool {
    s.len() < 100
        && s.bytes()
            .all(|b| !matches!(b, 0..=31 | 127 | b'\\' | b'"'))
}

#[cfg(test)]
mod test {
    use super::*;

    fn lex(f: impl FnOnce(&mut LexWriter)) -> String {
        let mut out = Vec::new();
        f(&mut LexWriter::new(&mut out));
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn astring_forms() {
        assert_eq!("foo", lex(|l| {
            l.astring("foo");
        }));
        assert_eq!("\"nil\"", lex(|l| {
            l.astring("nil");
        }));
        assert_eq!("\"foo bar\"", lex(|l| {
            l.astring("foo bar");
        }));
        assert_eq!("{8}\r\nfoo\\ bar", lex(|l| {
            l.astring("foo\\ bar");
        }));
        assert_eq!("\"föö\"", lex(|l| {
            l.astring("föö");
        }));
    }

    #[test]
    fn flags_and_nil() {
        assert_eq!("()", lex(|l| {
            l.flags(&[]);
        }));
        assert_eq!(
            "(\\Seen \\Flagged)",
            lex(|l| {
                l.flags(&["\\Seen".to_owned(), "\\Flagged".to_owned()]);
            })
        );
        assert_eq!("NIL", lex(|l| {
            l.nstring(&None::<&str>);
        }));
    }

    #[test]
    fn datetime_format() {
        let dt = Utc.ymd(2026, 2, 1).and_hms(3, 4, 5);
        assert_eq!(
            "\" 1-Feb-2026 03:04:05 +0000\"",
            lex(|l| {
                l.datetime(&dt);
            })
        );
    }
}
