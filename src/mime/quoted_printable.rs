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

//! Quoted-printable transfer encoding, RFC 2045 §6.7.

/// Decodes quoted-printable content.
///
/// This never fails: invalid escape sequences are passed through verbatim,
/// and soft line breaks with either DOS or bare-LF endings are discarded.
/// 8-bit bytes pass through untouched, including invalid UTF-8.
pub fn qp_decode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut ix = 0;

    while ix < src.len() {
        let b = src[ix];
        if b'=' != b {
            out.push(b);
            ix += 1;
            continue;
        }

        let rest = &src[ix + 1..];
        if rest.starts_with(b"\r\n") {
            // Soft break, DOS ending
            ix += 3;
        } else if rest.starts_with(b"\n") {
            // Soft break, bare LF
            ix += 2;
        } else if let Some(byte) = rest
            .get(..2)
            .and_then(|pair| std::str::from_utf8(pair).ok())
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        {
            out.push(byte);
            ix += 3;
        } else {
            // Dangling or malformed escape, keep verbatim
            out.push(b'=');
            ix += 1;
        }
    }

    out
}

/// Encodes content as quoted-printable with soft breaks at 76 columns.
///
/// CRLF sequences in the input are preserved as hard line breaks.
pub fn qp_encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut column = 0;

    let mut ix = 0;
    while ix < src.len() {
        let b = src[ix];

        if b'\r' == b && Some(&b'\n') == src.get(ix + 1) {
            out.extend_from_slice(b"\r\n");
            column = 0;
            ix += 2;
            continue;
        }

        let literal = match b {
            b'=' => false,
            b' ' | b'\t' => {
                // Whitespace may not end a line
                !matches!(
                    src.get(ix + 1),
                    None | Some(&b'\r') | Some(&b'\n')
                )
            },
            0x21..=0x7E => true,
            _ => false,
        };

        let width = if literal { 1 } else { 3 };
        if column + width > 75 {
            out.extend_from_slice(b"=\r\n");
            column = 0;
        }

        if literal {
            out.push(b);
        } else {
            out.extend_from_slice(format!("={:02X}", b).as_bytes());
        }
        column += width;
        ix += 1;
    }

    out
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn assert_qp(expected: &[u8], input: &[u8]) {
        assert_eq!(expected.to_vec(), qp_decode(input));
    }

    #[test]
    fn test_qp_decode() {
        assert_qp(b"hello world", b"hello world");
        assert_qp(b"\xabfoo", b"=ABfoo");
        assert_qp(b"fo\xabo", b"fo=ABo");
        assert_qp(b"foo\xab", b"foo=AB");
        assert_qp(b"foo\xab\xcd", b"foo=AB=CD");

        assert_qp(b"foo", b"foo=\n");
        assert_qp(b"foobar", b"foo=\nbar");
        assert_qp(b"foo", b"foo=\r\n");
        assert_qp(b"foobar", b"foo=\r\nbar");

        assert_qp(b"foo=()bar", b"foo=()bar");
        assert_qp(b"foo=\xabbar", b"foo==ABbar");
        assert_qp("foo=ゑbar".as_bytes(), "foo=ゑbar".as_bytes());

        assert_qp(b"foo=", b"foo=");
        assert_qp(b"foo=A", b"foo=A");
        assert_qp(b"foo=\r", b"foo=\r");
    }

    #[test]
    fn test_qp_encode() {
        assert_eq!(b"hello world".to_vec(), qp_encode(b"hello world"));
        assert_eq!(b"a=3Db".to_vec(), qp_encode(b"a=b"));
        assert_eq!(b"caf=C3=A9".to_vec(), qp_encode("café".as_bytes()));
        assert_eq!(b"line1\r\nline2".to_vec(), qp_encode(b"line1\r\nline2"));
        assert_eq!(b"trailing=20".to_vec(), qp_encode(b"trailing "));
    }

    proptest! {
        #[test]
        fn decode_never_panics(
            s in prop::collection::vec(prop::num::u8::ANY, 0..64)
        ) {
            qp_decode(&s);
        }

        #[test]
        fn encode_decode_round_trips(
            s in prop::collection::vec(prop::num::u8::ANY, 0..64)
        ) {
            // CR not followed by LF is the one thing the encoder normalises
            // away, so keep it out of the property.
            let s: Vec<u8> = s
                .into_iter()
                .filter(|&b| b != b'\r' && b != b'\n')
                .collect();
            prop_assert_eq!(s.clone(), qp_decode(&qp_encode(&s)));
        }
    }
}
