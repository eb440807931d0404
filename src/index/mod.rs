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

//! The message indexer.
//!
//! Walks a parsed tree and produces the searchable/store-ready view of a
//! message: inline text, inline HTML, and externalised attachments. The
//! tree is mutated in place: externalised bodies are cleared and replaced
//! by a blob reference, and `cid:` links in the kept text are rewritten to
//! stable attachment references.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::warn;
use regex::{Captures, Regex};

use chrono::prelude::*;

use crate::mime::content_encoding::{decode_charset, decode_transfer};
use crate::mime::encoded_word::ew_decode_unstructured;
use crate::mime::envelope::Envelope;
use crate::mime::model::Part;
use crate::store::blob::{BlobMetadata, BlobStore};
use crate::store::model::{
    Attachment, MailboxId, Message, Modseq, Uid, UserId,
};
use crate::support::error::Error;
use crate::support::ids::ArcIdSource;

/// Parts larger than this are externalised even when they are inline text.
const INLINE_SIZE_LIMIT: u32 = 300 * 1024;

lazy_static! {
    static ref CID_LINK: Regex = Regex::new(r#"\bcid:([^\s"']+)"#).unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
}

pub struct Indexer {
    blobs: Arc<dyn BlobStore>,
    ids: ArcIdSource,
}

/// What indexing a message yields, besides the mutated tree.
#[derive(Clone, Debug, Default)]
pub struct IndexedContent {
    /// Inline plain text, all parts joined with newlines.
    pub text: String,
    /// Inline HTML parts.
    pub html: Vec<String>,
    /// Externalised attachments, in walk order.
    pub attachments: Vec<Attachment>,
}

struct Walk<'a> {
    message_id: &'a str,
    text: Vec<String>,
    html: Vec<String>,
    attachments: Vec<Attachment>,
    cid_map: HashMap<String, String>,
}

impl Indexer {
    pub fn new(blobs: Arc<dyn BlobStore>, ids: ArcIdSource) -> Self {
        Indexer { blobs, ids }
    }

    /// Indexes a parsed tree under the given message identifier.
    ///
    /// Indexing an already-indexed tree reproduces the same attachment
    /// metadata and the same rewritten bodies: externalised parts are
    /// re-read from the blob store under their existing id.
    pub fn index(
        &self,
        tree: &mut Part,
        message_id: &str,
    ) -> Result<IndexedContent, Error> {
        let mut walk = Walk {
            message_id,
            text: Vec::new(),
            html: Vec::new(),
            attachments: Vec::new(),
            cid_map: HashMap::new(),
        };

        self.walk_tree(tree, false, false, &mut walk)?;

        let text = walk
            .text
            .iter()
            .map(|c| rewrite_cid_links(c, message_id, &walk.cid_map))
            .collect::<Vec<_>>()
            .join("\n");
        let html = walk
            .html
            .iter()
            .map(|c| rewrite_cid_links(c, message_id, &walk.cid_map))
            .collect();

        Ok(IndexedContent {
            text,
            html,
            attachments: walk.attachments,
        })
    }

    fn walk_tree(
        &self,
        node: &mut Part,
        mut alternative: bool,
        mut related: bool,
        walk: &mut Walk<'_>,
    ) -> Result<(), Error> {
        // An embedded message stands in for the node that carries it.
        if let Some(ref mut message) = node.message {
            return self.walk_tree(message, alternative, related, walk);
        }

        let content_type = node.content_type();
        let disposition = node.disposition();
        let transfer_encoding = node.transfer_encoding();

        if "multipart" == content_type.typ {
            if "alternative" == content_type.subtype {
                alternative = true;
            }
            if "related" == content_type.subtype {
                related = true;
            }
        }

        let is_inline_text = "text" == content_type.typ
            && ("plain" == content_type.subtype
                || "html" == content_type.subtype)
            && (disposition.is_empty() || "inline" == disposition);

        if is_inline_text {
            // The blob store holds already-decoded bytes for parts that
            // were externalised on an earlier pass.
            let decoded = if !node.body.is_empty() {
                let bytes =
                    decode_transfer(&node.body, &transfer_encoding);
                if bytes.is_none() {
                    warn!(
                        "message {}: undecodable {} content skipped",
                        walk.message_id, transfer_encoding
                    );
                }
                bytes
            } else if let Some(ref id) = node.attachment_id {
                Some(self.blobs.get(id)?)
            } else {
                None
            };

            if let Some(bytes) = decoded {
                let content = decode_charset(&bytes, &node.charset());
                if "html" == content_type.subtype {
                    walk.html.push(content.clone());
                    if !alternative {
                        walk.text.push(html_to_text(&content));
                    }
                } else {
                    walk.text.push(content.clone());
                    if !alternative {
                        walk.html.push(text_to_html(&content));
                    }
                }
            }
        }

        let is_multipart = "multipart" == content_type.typ;
        let externalise = !is_multipart
            && !node.body.is_empty()
            && (!is_inline_text || node.size > INLINE_SIZE_LIMIT);

        if externalise || node.attachment_id.is_some() {
            self.externalise(
                node,
                &content_type.value,
                &disposition,
                &transfer_encoding,
                related,
                is_inline_text,
                walk,
            )?;
        }

        for child in &mut node.children {
            self.walk_tree(child, alternative, related, walk)?;
        }

        Ok(())
    }

    fn externalise(
        &self,
        node: &mut Part,
        content_type: &str,
        disposition: &str,
        transfer_encoding: &str,
        related: bool,
        is_inline_text: bool,
        walk: &mut Walk<'_>,
    ) -> Result<(), Error> {
        let (blob_id, decoded) = match node.attachment_id {
            // Already externalised: reuse the id and the stored bytes.
            Some(ref id) => (id.clone(), self.blobs.get(id)?),
            None => {
                let decoded =
                    match decode_transfer(&node.body, transfer_encoding) {
                        Some(bytes) => bytes,
                        None => {
                            warn!(
                                "message {}: undecodable {} attachment \
                                 stored verbatim",
                                walk.message_id, transfer_encoding
                            );
                            node.body.clone()
                        },
                    };
                (self.ids.generate(), decoded)
            },
        };

        let filename = self
            .declared_filename(node)
            .unwrap_or_else(|| derived_filename(content_type, &decoded));
        let content_id = node.content_id();

        if node.attachment_id.is_none() {
            self.blobs.put(
                &blob_id,
                &decoded,
                BlobMetadata {
                    messages: vec![walk.message_id.to_owned()],
                    filename: filename.clone(),
                    content_type: content_type.to_owned(),
                    disposition: disposition.to_owned(),
                    transfer_encoding: transfer_encoding.to_owned(),
                },
            )?;
        }

        let info = Attachment {
            id: blob_id.clone(),
            filename,
            content_type: content_type.to_owned(),
            disposition: disposition.to_owned(),
            transfer_encoding: transfer_encoding.to_owned(),
            related,
            size_kb: (decoded.len() as u64 + 1023) / 1024,
            content_id: Some(content_id.clone())
                .filter(|c| !c.is_empty()),
        };

        if !content_id.is_empty() {
            walk.cid_map.insert(content_id, blob_id.clone());
        }

        // Inline text over the size limit and inline embedded messages are
        // externalised for storage but not listed as attachments.
        let inline_rfc822 = "message/rfc822" == content_type
            && (disposition.is_empty() || "inline" == disposition);
        if !is_inline_text && !inline_rfc822 {
            walk.attachments.push(info);
        }

        // `size` survives so stored trees still describe the original
        // octet counts.
        node.body.clear();
        node.attachment_id = Some(blob_id);
        Ok(())
    }

    fn declared_filename(&self, node: &Part) -> Option<String> {
        let from_disposition = node
            .parsed_header
            .get("content-disposition")
            .and_then(crate::mime::model::HeaderValue::as_params)
            .and_then(|vp| vp.param("filename"))
            .map(str::to_owned);

        from_disposition
            .or_else(|| {
                node.content_type().param("name").map(str::to_owned)
            })
            .map(|name| ew_decode_unstructured(&name).into_owned())
            .filter(|name| !name.is_empty())
    }
}

/// A stable synthetic filename: the first bytes of the content hash plus a
/// content-type-derived extension.
fn derived_filename(content_type: &str, content: &[u8]) -> String {
    let digest =
        openssl::hash::hash(openssl::hash::MessageDigest::md5(), content)
            .map(|d| crate::support::ids::hex(&d[..4]))
            .unwrap_or_else(|_| "00000000".to_owned());

    format!("{}.{}", digest, extension_for(content_type))
}

/// Assembles the message document for an indexed tree.
///
/// The document starts unseen, undeleted, and recent; callers flip flags
/// afterwards as their command or filters dictate.
pub fn build_message(
    id: String,
    user: UserId,
    mailbox: MailboxId,
    uid: Uid,
    size: u64,
    internal_date: DateTime<Utc>,
    tree: Part,
    content: IndexedContent,
) -> Message {
    let envelope = Envelope::extract(&tree);
    let references = tree
        .parsed_header
        .get_text("references")
        .map(|refs| {
            refs.split_whitespace().map(str::to_owned).collect()
        })
        .unwrap_or_default();

    Message {
        id,
        user,
        mailbox,
        uid,
        modseq: Modseq(0),
        size,
        internal_date,
        unseen: true,
        answered: false,
        flagged: false,
        undeleted: true,
        draft: false,
        recent: true,
        envelope,
        references,
        mime_tree: tree,
        text: content.text,
        html: content.html,
        attachments: content.attachments,
        expires: None,
    }
}

fn rewrite_cid_links(
    content: &str,
    message_id: &str,
    cid_map: &HashMap<String, String>,
) -> String {
    CID_LINK
        .replace_all(content, |caps: &Captures| match cid_map.get(&caps[1]) {
            Some(blob_id) => {
                format!("attachment:{}/{}", message_id, blob_id)
            },
            None => caps[0].to_owned(),
        })
        .into_owned()
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "text/plain" => "txt",
        "text/html" => "html",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "message/rfc822" => "eml",
        _ => "bin",
    }
}

fn html_to_text(html: &str) -> String {
    let text = HTML_TAG.replace_all(html, "");
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
        .trim()
        .to_owned()
}

fn text_to_html(text: &str) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace("\r\n", "\n")
        .replace('\n', "<br>\n");
    format!("<pre>{}</pre>", escaped)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::mime::parser::parse;
    use crate::store::blob::MemoryBlobStore;
    use crate::support::ids::SequentialIdSource;

    fn indexer() -> (Indexer, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        (
            Indexer::new(
                Arc::clone(&blobs) as Arc<dyn BlobStore>,
                Arc::new(SequentialIdSource::default()),
            ),
            blobs,
        )
    }

    fn parse_str(message: &str) -> Part {
        parse(message.replace('\n', "\r\n").as_bytes())
    }

    #[test]
    fn plain_text_message() {
        let (indexer, _) = indexer();
        let mut tree = parse_str("From: a@x\n\nhello & <world>\n");
        let content = indexer.index(&mut tree, "m1").unwrap();

        assert_eq!("hello & <world>\r\n", content.text);
        assert_eq!(
            vec!["<pre>hello &amp; &lt;world&gt;<br>\n</pre>".to_owned()],
            content.html
        );
        assert!(content.attachments.is_empty());
        // Inline text stays in the tree
        assert!(!tree.body.is_empty());
    }

    #[test]
    fn alternative_parts_do_not_cross_derive() {
        let (indexer, _) = indexer();
        let mut tree = parse_str(
            "\
Content-Type: multipart/alternative; boundary=b

--b
Content-Type: text/plain

plain version
--b
Content-Type: text/html

<p>html version</p>
--b--
",
        );
        let content = indexer.index(&mut tree, "m1").unwrap();

        assert_eq!("plain version\r\n", content.text);
        assert_eq!(vec!["<p>html version</p>".to_owned()], content.html);
    }

    #[test]
    fn html_only_derives_text() {
        let (indexer, _) = indexer();
        let mut tree = parse_str(
            "\
Content-Type: text/html

<p>Hello &amp; goodbye</p>
",
        );
        let content = indexer.index(&mut tree, "m1").unwrap();
        assert_eq!("Hello & goodbye", content.text);
    }

    #[test]
    fn attachments_are_externalised() {
        let (indexer, blobs) = indexer();
        let mut tree = parse_str(
            "\
Content-Type: multipart/mixed; boundary=b

--b
Content-Type: text/plain

see attached
--b
Content-Type: application/pdf; name=\"doc.pdf\"
Content-Transfer-Encoding: base64

JVBERi0xLjQ=
--b--
",
        );
        let content = indexer.index(&mut tree, "m1").unwrap();

        assert_eq!(1, content.attachments.len());
        let attachment = &content.attachments[0];
        assert_eq!("doc.pdf", attachment.filename);
        assert_eq!("application/pdf", attachment.content_type);
        assert_eq!("base64", attachment.transfer_encoding);
        assert_eq!(1, attachment.size_kb);
        assert!(!attachment.related);

        // Decoded content landed in the blob store
        assert_eq!(
            b"%PDF-1.4".to_vec(),
            blobs.get(&attachment.id).unwrap()
        );
        assert_eq!(
            vec!["m1".to_owned()],
            blobs.metadata(&attachment.id).unwrap().messages
        );

        // The tree body was cleared and now references the blob
        let pdf = &tree.children[1];
        assert!(pdf.body.is_empty());
        assert_eq!(Some(attachment.id.clone()), pdf.attachment_id);
    }

    #[test]
    fn related_parts_rewrite_cid_links() {
        let (indexer, _) = indexer();
        let mut tree = parse_str(
            "\
Content-Type: multipart/related; boundary=b

--b
Content-Type: text/html

<img src=\"cid:logo@x\">
--b
Content-Type: image/png
Content-Id: <logo@x>
Content-Transfer-Encoding: base64

iVBORw0KGgo=
--b--
",
        );
        let content = indexer.index(&mut tree, "msg42").unwrap();

        let logo = &content.attachments[0];
        assert!(logo.related);
        assert_eq!(Some("logo@x".to_owned()), logo.content_id);
        assert_eq!(
            format!("<img src=\"attachment:msg42/{}\">", logo.id),
            content.html[0]
        );
    }

    #[test]
    fn oversized_inline_text_is_externalised_but_not_an_attachment() {
        let (indexer, blobs) = indexer();
        let big = "x".repeat(INLINE_SIZE_LIMIT as usize + 100);
        let mut tree =
            parse_str(&format!("Content-Type: text/plain\n\n{}\n", big));
        let content = indexer.index(&mut tree, "m1").unwrap();

        assert!(content.attachments.is_empty());
        assert!(tree.body.is_empty());
        let blob_id = tree.attachment_id.clone().unwrap();
        assert!(blobs.get(&blob_id).unwrap().len() > INLINE_SIZE_LIMIT as usize);
        // The inline text was still extracted
        assert!(content.text.starts_with("xxx"));
    }

    #[test]
    fn indexing_twice_is_idempotent() {
        let (indexer, _) = indexer();
        let mut tree = parse_str(
            "\
Content-Type: multipart/related; boundary=b

--b
Content-Type: text/html

<img src=\"cid:logo@x\">
--b
Content-Type: image/png
Content-Id: <logo@x>
Content-Transfer-Encoding: base64

iVBORw0KGgo=
--b--
",
        );

        let first = indexer.index(&mut tree, "m1").unwrap();
        let second = indexer.index(&mut tree, "m1").unwrap();

        assert_eq!(first.attachments, second.attachments);
        assert_eq!(first.html, second.html);
        assert_eq!(first.text, second.text);
    }

    #[test]
    fn derived_filenames_are_stable() {
        let a = derived_filename("image/png", b"data");
        let b = derived_filename("image/png", b"data");
        assert_eq!(a, b);
        assert!(a.ends_with(".png"));
        assert_ne!(a, derived_filename("image/png", b"other"));
    }
}
