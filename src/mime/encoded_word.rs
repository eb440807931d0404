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

//! RFC 2047 encoded-word decoding for unstructured header text, display
//! names, and filenames.

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;

use super::quoted_printable::qp_decode;

lazy_static! {
    static ref ENCODED_WORD: Regex =
        Regex::new(r"^=\?([!->@-~]*)\?([!->@-~]*)\?([!->@-~]*)\?=$").unwrap();
}

fn is_linear_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Decode all encoded words in the given unstructured string.
///
/// Whitespace between two adjacent encoded words is deleted, per the RFC;
/// everything else passes through unchanged.
pub fn ew_decode_unstructured(text: &str) -> Cow<str> {
    if !text.contains("=?") {
        return Cow::Borrowed(text);
    }

    // Forward scan over alternating words and whitespace gaps. Each gap is
    // held back until the following word is classified: a gap between two
    // encoded words is dropped, any other gap is emitted as-is.
    let mut out = String::with_capacity(text.len());
    let mut gap = "";
    let mut after_encoded_word = false;
    let mut decoded_any = false;
    let mut rest = text;

    loop {
        let word_len =
            rest.find(is_linear_whitespace).unwrap_or(rest.len());
        let (word, tail) = rest.split_at(word_len);

        match ew_decode(word) {
            Some(decoded) => {
                if !after_encoded_word {
                    out.push_str(gap);
                }
                out.push_str(&decoded);
                after_encoded_word = true;
                decoded_any = true;
            },
            None => {
                out.push_str(gap);
                out.push_str(word);
                if !word.is_empty() {
                    after_encoded_word = false;
                }
            },
        }

        let gap_len = tail
            .find(|c| !is_linear_whitespace(c))
            .unwrap_or(tail.len());
        let (next_gap, next_rest) = tail.split_at(gap_len);
        gap = next_gap;
        rest = next_rest;

        if rest.is_empty() {
            out.push_str(gap);
            break;
        }
    }

    if decoded_any {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

/// Test if `word` (in its entirety) is an RFC 2047 encoded word, and decode
/// it if so.
///
/// The RFC's 75-character limit is deliberately not enforced; real agents
/// produce longer words and real clients interpret them.
pub fn ew_decode(word: &str) -> Option<String> {
    let captures = ENCODED_WORD.captures(word)?;

    let charset = captures.get(1).unwrap().as_str();
    let transfer_encoding = captures.get(2).unwrap().as_str();

    // '_' stands for ASCII space regardless of charset, and is mapped
    // before transfer decoding
    let content: Vec<u8> = captures
        .get(3)
        .unwrap()
        .as_str()
        .bytes()
        .map(|b| if b'_' == b { b' ' } else { b })
        .collect();

    let content = decode_xfer(transfer_encoding, &content)?;
    decode_charset(charset, &content)
}

fn decode_xfer(xfer: &str, content: &[u8]) -> Option<Vec<u8>> {
    match xfer {
        "q" | "Q" => Some(qp_decode(content)),
        "b" | "B" => base64::decode(content).ok(),
        _ => None,
    }
}

fn decode_charset(charset: &str, content: &[u8]) -> Option<String> {
    // RFC 2184 allows a language suffix after '*'; there is nothing useful
    // to do with it.
    let charset = charset.split('*').next().unwrap();

    let encoding = encoding_rs::Encoding::for_label(charset.as_bytes())?;
    let (decoded, _, _) = encoding.decode(content);
    Some(decoded.into_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simple_words() {
        assert_eq!(
            Some("Hello World".to_owned()),
            ew_decode("=?us-ascii?q?Hello_World?=")
        );
        assert_eq!(
            Some("föö".to_owned()),
            ew_decode("=?utf-8?b?ZsO2w7Y=?=")
        );
        assert_eq!(None, ew_decode("plain"));
        assert_eq!(None, ew_decode("=?utf-8?x?bogus?="));
        assert_eq!(None, ew_decode("=?no-such-charset?q?x?="));
    }

    #[test]
    fn unstructured_decoding() {
        // Whitespace between adjacent encoded words is deleted
        assert_eq!(
            "This is adescription",
            ew_decode_unstructured(
                "=?us-ascii?q?This_is_a?= =?us-ascii?q?description?="
            )
        );
        assert_eq!(
            "This is a description",
            ew_decode_unstructured(
                "=?us-ascii?q?This_is_a?= =?us-ascii?q?=20description?="
            )
        );
        assert_eq!(
            "before Hello after",
            ew_decode_unstructured("before =?us-ascii?q?Hello?= after")
        );
        assert_eq!(
            "nothing encoded here",
            ew_decode_unstructured("nothing encoded here")
        );
        // Leading and trailing whitespace survive; only the gap between
        // two encoded words is deleted, however wide
        assert_eq!(
            "  ab  ",
            ew_decode_unstructured(
                "  =?us-ascii?q?a?= \r\n =?us-ascii?q?b?=  "
            )
        );
    }

    #[test]
    fn latin1_charset() {
        assert_eq!(
            Some("café".to_owned()),
            ew_decode("=?iso-8859-1?q?caf=E9?=")
        );
    }
}
