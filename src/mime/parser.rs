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

//! The RFC 822 / MIME tree parser.
//!
//! Parsing is total: any byte sequence produces a tree reflecting what was
//! seen. The working state is a stack of open nodes; the finished tree is a
//! pure downward graph.
//!
//! Each node runs a two-state machine (header, body). Body lines are
//! compared against the node's own boundary (which opens the first child),
//! the parent's boundary (closes the node, opens a sibling), and the
//! parent's terminator (closes the node and pops). Line breaks belong to
//! the delimiter before a boundary line, not to the body.

use memchr::memchr;

use super::content_encoding::encode_transfer;
use super::header;
use super::model::{HeaderValue, Part};

/// Parses a byte slice holding an RFC 822 message into a finished tree.
pub fn parse(raw: &[u8]) -> Part {
    let mut part = parse_tree(raw);
    finalize(&mut part);
    part
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Header,
    Body,
}

struct Work {
    part: Part,
    state: State,
    boundary: Option<String>,
    parent_boundary: Option<String>,
}

impl Work {
    fn new(parent_boundary: Option<String>) -> Self {
        Work {
            part: Part::default(),
            state: State::Header,
            boundary: None,
            parent_boundary,
        }
    }
}

enum BodyAction {
    /// Close the current node; `true` opens a sibling, `false` pops.
    Close(bool),
    OpenChild(String),
    Append,
}

fn parse_tree(raw: &[u8]) -> Part {
    let mut stack: Vec<Work> = vec![Work::new(None)];
    let mut prev_br: &[u8] = b"";
    let mut pos = 0;

    while pos < raw.len() {
        let (line, br, next) = read_line(raw, pos);
        pos = next;
        handle_line(&mut stack, line, prev_br);
        prev_br = br;
    }

    // Input ending with a newline has one final, empty line; this is what
    // makes a trailing CRLF part of the body it terminates.
    if !prev_br.is_empty() {
        handle_line(&mut stack, b"", prev_br);
    }

    // Unclosed boundaries: fold everything back into its parent.
    while stack.len() > 1 {
        let closed = stack.pop().unwrap();
        stack.last_mut().unwrap().part.children.push(closed.part);
    }

    stack.pop().unwrap().part
}

fn handle_line(stack: &mut Vec<Work>, line: &[u8], prev_br: &[u8]) {
    let top = stack.last_mut().expect("parser stack underflow");
    match top.state {
        State::Header => {
            if line.is_empty() {
                process_header(top);
                top.state = State::Body;
            } else {
                top.part
                    .header
                    .push(String::from_utf8_lossy(line).into_owned());
            }
        },

        State::Body => match body_action(top, line) {
            BodyAction::Close(open_sibling) => {
                let closed = stack.pop().unwrap();
                let parent_boundary = closed.parent_boundary.clone();
                stack.last_mut().unwrap().part.children.push(closed.part);
                if open_sibling {
                    stack.push(Work::new(parent_boundary));
                }
            },
            BodyAction::OpenChild(boundary) => {
                stack.push(Work::new(Some(boundary)));
            },
            BodyAction::Append => {
                if top.part.body.is_empty() {
                    top.part.body.extend_from_slice(line);
                } else {
                    top.part.body.extend_from_slice(prev_br);
                    top.part.body.extend_from_slice(line);
                }
            },
        },
    }
}

fn body_action(top: &Work, line: &[u8]) -> BodyAction {
    if let Some(ref pb) = top.parent_boundary {
        if boundary_line(line, pb, false) {
            return BodyAction::Close(true);
        }
        if boundary_line(line, pb, true) {
            return BodyAction::Close(false);
        }
    }

    if let Some(ref own) = top.boundary {
        if boundary_line(line, own, false) {
            return BodyAction::OpenChild(own.clone());
        }
    }

    BodyAction::Append
}

fn boundary_line(line: &[u8], boundary: &str, terminator: bool) -> bool {
    let b = boundary.as_bytes();
    let expected_len = 2 + b.len() + if terminator { 2 } else { 0 };
    line.len() == expected_len
        && line.starts_with(b"--")
        && &line[2..2 + b.len()] == b
        && (!terminator || line.ends_with(b"--"))
}

/// Reads one line starting at `pos`, returning the line without its ending,
/// the ending itself (empty at EOF), and the next read position.
fn read_line(raw: &[u8], pos: usize) -> (&[u8], &[u8], usize) {
    match memchr(b'\n', &raw[pos..]) {
        Some(ix) => {
            let nl = pos + ix;
            let line_end = if nl > pos && b'\r' == raw[nl - 1] {
                nl - 1
            } else {
                nl
            };
            (&raw[pos..line_end], &raw[line_end..=nl], nl + 1)
        },
        None => (&raw[pos..], b"", raw.len()),
    }
}

/// Structural fields that are single-valued; the last occurrence wins.
const SINGLE_VALUED: &[&str] = &[
    "content-transfer-encoding",
    "content-id",
    "content-description",
    "content-language",
    "content-md5",
    "content-location",
];

const ADDRESS_FIELDS: &[&str] =
    &["from", "sender", "reply-to", "to", "cc", "bcc"];

fn process_header(work: &mut Work) {
    let lines = &mut work.part.header;

    // Re-join folded continuations onto their first line, preserving the
    // CRLF so the raw header round-trips.
    let mut ix = lines.len();
    while ix > 1 {
        ix -= 1;
        if lines[ix].starts_with(' ') || lines[ix].starts_with('\t') {
            let cont = lines.remove(ix);
            lines[ix - 1].push_str("\r\n");
            lines[ix - 1].push_str(&cont);
        }
    }

    let parsed = &mut work.part.parsed_header;
    for line in lines.iter() {
        let mut split = line.splitn(2, ':');
        let key = match (split.next(), split.next()) {
            (Some(key), Some(_)) => key.trim().to_lowercase(),
            _ => continue,
        };
        let value = split_value(line);

        if header::is_valid_key(&key) {
            parsed.accumulate(&key, header::unfold(value.trim()));
        }
    }

    if !parsed.contains("content-type") {
        parsed.set(
            "content-type",
            HeaderValue::Text("text/plain".to_owned()),
        );
    }

    for key in &["content-type", "content-disposition"] {
        if let Some(value) = parsed.get(key) {
            let last = match value {
                HeaderValue::List(list) => {
                    list.last().cloned().unwrap_or_default()
                },
                v => v.as_text().unwrap_or("").to_owned(),
            };
            parsed.set(key, HeaderValue::Params(header::parse_value_params(&last)));
        }
    }

    for key in SINGLE_VALUED {
        if let Some(HeaderValue::List(list)) = parsed.get(key) {
            let last = list.last().cloned().unwrap_or_default();
            parsed.set(key, HeaderValue::Text(last));
        }
    }

    for key in ADDRESS_FIELDS {
        let values: Vec<String> = match parsed.get(key) {
            Some(HeaderValue::Text(v)) => vec![v.clone()],
            Some(HeaderValue::List(list)) => list.clone(),
            _ => continue,
        };

        let mut addresses = Vec::new();
        for value in &values {
            addresses.extend(header::parse_address_list(value));
        }

        if !addresses.is_empty() {
            parsed.set(key, HeaderValue::Addresses(addresses));
        }
    }

    if let Some(ct) = parsed.get("content-type").and_then(HeaderValue::as_params)
    {
        if "multipart" == ct.typ {
            if let Some(boundary) = ct.param("boundary") {
                work.part.multipart = Some(ct.subtype.clone());
                work.part.boundary = Some(boundary.to_owned());
                work.boundary = Some(boundary.to_owned());
            }
        }
    }
}

/// The value portion of a raw header line: everything after the first `:`.
fn split_value(line: &str) -> &str {
    match line.find(':') {
        Some(ix) => &line[ix + 1..],
        None => "",
    }
}

fn finalize(part: &mut Part) {
    if part.message.is_none()
        && !part.body.is_empty()
        && "message/rfc822" == part.content_type().value
    {
        part.message = Some(Box::new(parse_tree(&part.body)));
    }

    if !part.body.is_empty() {
        part.body = normalize_crlf(&part.body);
        part.line_count =
            part.body.iter().filter(|&&b| b'\n' == b).count() as u32;
        part.size = part.body.len() as u32;
    }

    for child in &mut part.children {
        finalize(child);
    }
    if let Some(ref mut message) = part.message {
        finalize(message);
    }
}

fn normalize_crlf(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for &b in body {
        if b'\n' == b && out.last() != Some(&b'\r') {
            out.push(b'\r');
        }
        out.push(b);
    }
    out
}

/// Reconstructs the wire form of a parsed tree.
///
/// `resolve` supplies the decoded bytes of externalised bodies by blob id;
/// they are re-encoded in the part's declared transfer encoding. The result
/// reparses to a structurally equal tree.
pub fn serialize(
    part: &Part,
    resolve: &dyn Fn(&str) -> Option<Vec<u8>>,
) -> Vec<u8> {
    let mut out = Vec::new();
    write_part(part, resolve, &mut out);
    out
}

fn write_part(
    part: &Part,
    resolve: &dyn Fn(&str) -> Option<Vec<u8>>,
    out: &mut Vec<u8>,
) {
    for line in &part.header {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    write_content(part, resolve, out);
}

/// The content of a part without its header block.
pub fn write_content(
    part: &Part,
    resolve: &dyn Fn(&str) -> Option<Vec<u8>>,
    out: &mut Vec<u8>,
) {
    match (&part.boundary, part.children.is_empty()) {
        (Some(boundary), false) => {
            if !part.body.is_empty() {
                out.extend_from_slice(&part.body);
                out.extend_from_slice(b"\r\n");
            }
            for child in &part.children {
                out.extend_from_slice(b"--");
                out.extend_from_slice(boundary.as_bytes());
                out.extend_from_slice(b"\r\n");
                write_part(child, resolve, out);
                out.extend_from_slice(b"\r\n");
            }
            // No CRLF after the terminator: a trailing break would reparse
            // as an extra (empty) epilogue line.
            out.extend_from_slice(b"--");
            out.extend_from_slice(boundary.as_bytes());
            out.extend_from_slice(b"--");
        },

        _ => {
            if !part.body.is_empty() {
                out.extend_from_slice(&part.body);
            } else if let Some(ref id) = part.attachment_id {
                if let Some(decoded) = resolve(id) {
                    out.extend_from_slice(&encode_transfer(
                        &decoded,
                        &part.transfer_encoding(),
                    ));
                }
            } else if let Some(ref message) = part.message {
                write_part(message, resolve, out);
            }
        },
    }
}
