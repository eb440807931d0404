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

//! Content-Transfer-Encoding handling.
//!
//! Decoding is what the indexer needs to get at part bodies; encoding is
//! what message reconstruction needs to put externalised bodies back on the
//! wire in their declared encoding.

use super::quoted_printable::{qp_decode, qp_encode};

/// Decodes a part body according to its declared transfer encoding.
///
/// `7bit`, `8bit`, `binary`, and anything unrecognised pass through
/// unchanged. `quoted-printable` is tolerant (bare LFs, malformed escapes).
/// `base64` is strict apart from ignoring embedded line breaks and
/// whitespace; undecodable base64 yields `None`.
pub fn decode_transfer(data: &[u8], encoding: &str) -> Option<Vec<u8>> {
    match encoding {
        "base64" => {
            let compact: Vec<u8> = data
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            base64::decode(&compact).ok()
        },
        "quoted-printable" => Some(qp_decode(data)),
        _ => Some(data.to_vec()),
    }
}

/// Re-encodes a decoded body in the declared transfer encoding.
pub fn encode_transfer(data: &[u8], encoding: &str) -> Vec<u8> {
    match encoding {
        "base64" => encode_base64_wrapped(data),
        "quoted-printable" => qp_encode(data),
        _ => data.to_vec(),
    }
}

/// Base64 with CRLF line breaks every 76 characters, per RFC 2045.
pub fn encode_base64_wrapped(data: &[u8]) -> Vec<u8> {
    let encoded = base64::encode(data);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / 38);
    for (ix, chunk) in encoded.as_bytes().chunks(76).enumerate() {
        if ix > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(chunk);
    }
    out
}

/// Decodes body bytes into text: transfer decoding followed by charset
/// conversion, defaulting to lossy UTF-8.
pub fn decode_text(
    data: &[u8],
    encoding: &str,
    charset: &str,
) -> Option<String> {
    let bytes = decode_transfer(data, encoding)?;
    Some(decode_charset(&bytes, charset))
}

/// Converts bytes in the named charset to a UTF-8 string, replacing
/// undecodable sequences. Unknown charset labels fall back to UTF-8.
pub fn decode_charset(data: &[u8], charset: &str) -> String {
    let encoding = encoding_rs::Encoding::for_label(charset.as_bytes())
        .unwrap_or(encoding_rs::UTF_8);
    let (decoded, _, _) = encoding.decode(data);
    decoded.into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base64_round_trip() {
        let data: Vec<u8> = (0u8..=255).collect();
        let encoded = encode_base64_wrapped(&data);
        // Wrapped at 76 columns
        assert!(encoded
            .split(|&b| b == b'\n')
            .all(|line| line.len() <= 77));
        assert_eq!(
            Some(data),
            decode_transfer(&encoded, "base64")
        );
    }

    #[test]
    fn base64_is_strict() {
        assert_eq!(None, decode_transfer(b"not!base64", "base64"));
        assert_eq!(
            Some(b"hello".to_vec()),
            decode_transfer(b"aGVs\r\nbG8=", "base64")
        );
    }

    #[test]
    fn identity_encodings_pass_through() {
        for enc in &["7bit", "8bit", "binary", "x-unknown"] {
            assert_eq!(
                Some(b"a\xffb".to_vec()),
                decode_transfer(b"a\xffb", enc)
            );
        }
    }

    #[test]
    fn charset_decoding() {
        assert_eq!("café", decode_charset("café".as_bytes(), "utf-8"));
        assert_eq!("caf\u{e9}", decode_charset(b"caf\xe9", "iso-8859-1"));
        // Unknown labels fall back to UTF-8
        assert_eq!("abc", decode_charset(b"abc", "not-a-charset"));
    }

    #[test]
    fn qp_text() {
        assert_eq!(
            Some("café".to_owned()),
            decode_text(b"caf=C3=A9", "quoted-printable", "utf-8")
        );
    }
}
