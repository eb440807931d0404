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

//! The response model of the session layer.
//!
//! Command handlers return a `CommandResponse`: zero or more pre-rendered
//! untagged response units followed by one tagged condition. Rendering
//! happens in the session so the server loop only shuttles bytes; each
//! untagged unit is a complete response (possibly containing embedded
//! literals) without its final CRLF.

use std::fmt;

/// Condition of a tagged (or untagged status) response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Ok,
    No,
    Bad,
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Cond::Ok => f.write_str("OK"),
            Cond::No => f.write_str("NO"),
            Cond::Bad => f.write_str("BAD"),
        }
    }
}

/// Bracketed response codes.
#[derive(Clone, Debug, PartialEq)]
pub enum Code {
    Nonexistent,
    AlreadyExists,
    TryCreate,
    Cannot,
    OverQuota,
    ReadOnly,
    ReadWrite,
    Parse,
    UidNext(u32),
    UidValidity(u32),
    Unseen(u32),
    HighestModseq(u64),
    PermanentFlags(Vec<String>),
    AppendUid { uid_validity: u32, uid: u32 },
    CopyUid {
        uid_validity: u32,
        from: String,
        to: String,
    },
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Code::Nonexistent => f.write_str("NONEXISTENT"),
            Code::AlreadyExists => f.write_str("ALREADYEXISTS"),
            Code::TryCreate => f.write_str("TRYCREATE"),
            Code::Cannot => f.write_str("CANNOT"),
            Code::OverQuota => f.write_str("OVERQUOTA"),
            Code::ReadOnly => f.write_str("READ-ONLY"),
            Code::ReadWrite => f.write_str("READ-WRITE"),
            Code::Parse => f.write_str("PARSE"),
            Code::UidNext(n) => write!(f, "UIDNEXT {}", n),
            Code::UidValidity(n) => write!(f, "UIDVALIDITY {}", n),
            Code::Unseen(n) => write!(f, "UNSEEN {}", n),
            Code::HighestModseq(n) => write!(f, "HIGHESTMODSEQ {}", n),
            Code::PermanentFlags(ref flags) => {
                write!(f, "PERMANENTFLAGS ({})", flags.join(" "))
            },
            Code::AppendUid { uid_validity, uid } => {
                write!(f, "APPENDUID {} {}", uid_validity, uid)
            },
            Code::CopyUid {
                uid_validity,
                ref from,
                ref to,
            } => write!(f, "COPYUID {} {} {}", uid_validity, from, to),
        }
    }
}

/// The tagged completion of a command.
#[derive(Clone, Debug)]
pub struct Tagged {
    pub cond: Cond,
    pub code: Option<Code>,
    pub text: String,
}

impl Tagged {
    pub fn ok(text: &str) -> Self {
        Tagged {
            cond: Cond::Ok,
            code: None,
            text: text.to_owned(),
        }
    }

    pub fn no(text: &str) -> Self {
        Tagged {
            cond: Cond::No,
            code: None,
            text: text.to_owned(),
        }
    }

    pub fn bad(text: &str) -> Self {
        Tagged {
            cond: Cond::Bad,
            code: None,
            text: text.to_owned(),
        }
    }

    pub fn with_code(mut self, code: Code) -> Self {
        self.code = Some(code);
        self
    }

    /// Renders `COND [CODE ]text` (everything after the tag).
    pub fn render(&self) -> String {
        match self.code {
            Some(ref code) => {
                format!("{} [{}] {}", self.cond, code, self.text)
            },
            None => format!("{} {}", self.cond, self.text),
        }
    }
}

/// A full command's worth of output.
#[derive(Clone, Debug)]
pub struct CommandResponse {
    /// Complete untagged responses, each without the trailing CRLF.
    pub untagged: Vec<Vec<u8>>,
    pub tagged: Tagged,
}

impl CommandResponse {
    pub fn tagged(tagged: Tagged) -> Self {
        CommandResponse {
            untagged: Vec::new(),
            tagged,
        }
    }
}

/// Renders an untagged status line such as `* OK [UIDNEXT 3] ...`.
pub fn untagged_cond(cond: Cond, code: Option<Code>, text: &str) -> Vec<u8> {
    let rendered = Tagged {
        cond,
        code,
        text: text.to_owned(),
    }
    .render();
    format!("* {}", rendered).into_bytes()
}
