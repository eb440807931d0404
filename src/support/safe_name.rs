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

/// Determine whether one segment of a mailbox path is "safe".
///
/// The full path is split on `/` before validation, so the hierarchy
/// delimiter itself is rejected here. This excludes empty segments, patterns
/// with special meaning to IMAP, and control characters; it deliberately
/// says nothing about what the backing store can represent.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        // Names beginning with # have special meaning in IMAP
        && !name.starts_with('#')
        && !name.chars().any(is_forbidden_char)
}

/// Validates a full mailbox path: non-empty `/`-separated safe segments,
/// with no leading, trailing, or doubled separator.
pub fn is_safe_path(path: &str) -> bool {
    !path.is_empty() && path.split('/').all(is_safe_name)
}

fn is_forbidden_char(ch: char) -> bool {
    match ch {
        // '/' is the hierarchy delimiter
        '/' |
        '\\' |
        // No ASCII control characters
        '\0'..='\x1F' | '\x7F' |
        // * and % are wildcards in LIST patterns, so forbid everywhere
        '*' | '%' |
        // RFC 5198 forbids C1 control characters
        '\u{80}'..='\u{9F}' |
        // RFC 6855 forbids the Unicode LINE SEPARATOR and PARAGRAPH
        // SEPARATOR characters
        '\u{2028}' | '\u{2029}' => true,
        _ => false,
    }
}
