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

//! The RFC 3501 `BODY` / `BODYSTRUCTURE` descriptors.
//!
//! The emitted shape depends on the content type of each part:
//!
//! - `multipart/*`: (child)(child)… subtype (params) [disposition language
//!   location] — extension fields carry no MD5.
//! - `message/rfc822`: basic fields, then the embedded message's envelope
//!   and structure, then the line count, then extensions.
//! - `text/*`: basic fields plus a line count, then extensions.
//! - anything else: basic fields, then extensions.
//!
//! Emission is deterministic: parameters keep the parsed insertion order.

use super::envelope::Envelope;
use super::model::{Field, Part, ValueParams};

/// Switches between the wire dialects of the descriptor.
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyStructureOptions {
    /// Emit upper-case keywords, as the wire format requires. Lower case is
    /// used for the internally stored form.
    pub upper_case_keys: bool,
    /// Omit the extension fields, producing `BODY` rather than
    /// `BODYSTRUCTURE`.
    pub body_only: bool,
    /// Collapse a single-element Content-Language list to a bare string.
    pub content_language_string: bool,
    /// Omit Content-Location from the extension fields.
    pub skip_content_location: bool,
}

pub fn body_structure(part: &Part, options: &BodyStructureOptions) -> Field {
    let content_type = part.content_type();

    match (content_type.typ.as_str(), content_type.subtype.as_str()) {
        ("multipart", _) => multipart_node(part, options),
        ("text", _) => text_node(part, options),
        ("message", "rfc822") => rfc822_node(part, options),
        _ => attachment_node(part, options),
    }
}

/// The fields every non-multipart part carries: type, subtype, params, id,
/// description, encoding, octets.
fn basic_fields(part: &Part, options: &BodyStructureOptions) -> Vec<Field> {
    let content_type = part.content_type();

    let mut body_type = content_type.typ.clone();
    let mut body_subtype = content_type.subtype.clone();
    if body_type.is_empty() {
        body_type = "text".to_owned();
    }
    if body_subtype.is_empty() {
        body_subtype = "plain".to_owned();
    }

    let mut transfer_encoding = part
        .parsed_header
        .get_text("content-transfer-encoding")
        .unwrap_or("7bit")
        .to_owned();

    if options.upper_case_keys {
        body_type = body_type.to_uppercase();
        body_subtype = body_subtype.to_uppercase();
        transfer_encoding = transfer_encoding.to_uppercase();
    }

    vec![
        Field::Str(body_type),
        Field::Str(body_subtype),
        param_list(&content_type, options),
        Field::from_opt(
            part.parsed_header.get_text("content-id").map(str::to_owned),
        ),
        Field::from_opt(
            part.parsed_header
                .get_text("content-description")
                .map(str::to_owned),
        ),
        Field::Str(transfer_encoding),
        Field::Num(part.size as u64),
    ]
}

/// Extension fields: md5, disposition, language, and (optionally) location.
fn extension_fields(
    part: &Part,
    options: &BodyStructureOptions,
) -> Vec<Field> {
    let mut fields = vec![
        Field::from_opt(
            part.parsed_header
                .get_text("content-md5")
                .map(str::to_owned),
        ),
        disposition_field(part, options),
        language_field(part, options),
    ];

    if !options.skip_content_location {
        fields.push(Field::from_opt(
            part.parsed_header
                .get_text("content-location")
                .map(str::to_owned),
        ));
    }

    fields
}

fn disposition_field(part: &Part, options: &BodyStructureOptions) -> Field {
    let disposition = match part
        .parsed_header
        .get("content-disposition")
        .and_then(super::model::HeaderValue::as_params)
    {
        Some(vp) => vp,
        None => return Field::Nil,
    };

    let mut value = disposition.value.clone();
    if options.upper_case_keys {
        value = value.to_uppercase();
    }

    Field::List(vec![
        Field::Str(value),
        param_list(disposition, options),
    ])
}

fn language_field(part: &Part, options: &BodyStructureOptions) -> Field {
    let raw = match part.parsed_header.get_text("content-language") {
        Some(s) => s,
        None => return Field::Nil,
    };

    let cleaned = raw.replace(' ', ",").replace(",,", ",");
    let languages: Vec<&str> = cleaned
        .trim_matches(',')
        .split(',')
        .filter(|s| !s.is_empty())
        .collect();

    match languages.len() {
        0 => Field::Nil,
        1 if options.content_language_string => {
            Field::Str(languages[0].to_owned())
        },
        _ => Field::List(
            languages
                .into_iter()
                .map(|l| Field::Str(l.to_owned()))
                .collect(),
        ),
    }
}

/// Parameters as an alternating key/value list, NIL when empty.
fn param_list(vp: &ValueParams, options: &BodyStructureOptions) -> Field {
    if !vp.has_params() {
        return Field::Nil;
    }

    let mut items = Vec::with_capacity(vp.params.len() * 2);
    for (key, value) in &vp.params {
        let key = if options.upper_case_keys {
            key.to_uppercase()
        } else {
            key.clone()
        };
        items.push(Field::Str(key));
        items.push(Field::Str(value.clone()));
    }
    Field::List(items)
}

fn multipart_node(part: &Part, options: &BodyStructureOptions) -> Field {
    let mut result = Vec::new();

    if part.children.is_empty() {
        result.push(Field::List(vec![]));
    } else {
        for child in &part.children {
            result.push(body_structure(child, options));
        }
    }

    let mut subtype = part
        .multipart
        .clone()
        .unwrap_or_else(|| part.content_type().subtype);
    if subtype.is_empty() {
        subtype = "mixed".to_owned();
    }
    if options.upper_case_keys {
        subtype = subtype.to_uppercase();
    }
    result.push(Field::Str(subtype));

    result.push(param_list(&part.content_type(), options));

    if !options.body_only {
        // Multipart extensions carry no MD5
        result.extend(extension_fields(part, options).into_iter().skip(1));
    }

    Field::List(result)
}

fn text_node(part: &Part, options: &BodyStructureOptions) -> Field {
    let mut result = basic_fields(part, options);
    result.push(Field::Num(part.line_count as u64));
    if !options.body_only {
        result.extend(extension_fields(part, options));
    }
    Field::List(result)
}

fn attachment_node(part: &Part, options: &BodyStructureOptions) -> Field {
    let mut result = basic_fields(part, options);
    if !options.body_only {
        result.extend(extension_fields(part, options));
    }
    Field::List(result)
}

fn rfc822_node(part: &Part, options: &BodyStructureOptions) -> Field {
    let mut result = basic_fields(part, options);

    match part.message {
        Some(ref message) => {
            result.push(Envelope::extract(message).to_field());
            result.push(body_structure(message, options));
        },
        None => {
            result.push(Field::List(vec![Field::Nil; 10]));
            result.push(Field::List(vec![]));
        },
    }

    result.push(Field::Num(part.line_count as u64));
    if !options.body_only {
        result.extend(extension_fields(part, options));
    }
    Field::List(result)
}
