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

//! Command-line syntax: tokenisation and the command grammar.
//!
//! The server collects a full command first — the text of each physical
//! line plus the raw octets of any literals — and hands both here. Literals
//! therefore appear as ready-made tokens and the grammar below never needs
//! to re-frame them.

use chrono::prelude::*;

use crate::store::model::Flag;

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Atom(String),
    Quoted(String),
    Literal(Vec<u8>),
    LParen,
    RParen,
}

/// Tokenises the text fragments of a command, splicing `literals` between
/// them in order.
pub fn tokenize(
    text_parts: &[Vec<u8>],
    literals: &[Vec<u8>],
) -> Result<Vec<Token>, String> {
    debug_assert_eq!(text_parts.len(), literals.len() + 1);

    let mut tokens = Vec::new();
    for (ix, part) in text_parts.iter().enumerate() {
        tokenize_text(part, &mut tokens)?;
        if ix < literals.len() {
            tokens.push(Token::Literal(literals[ix].clone()));
        }
    }
    Ok(tokens)
}

fn tokenize_text(text: &[u8], tokens: &mut Vec<Token>) -> Result<(), String> {
    let mut pos = 0;

    while pos < text.len() {
        match text[pos] {
            b' ' => pos += 1,
            b'(' => {
                tokens.push(Token::LParen);
                pos += 1;
            },
            b')' => {
                tokens.push(Token::RParen);
                pos += 1;
            },
            b'"' => {
                pos += 1;
                let mut content = Vec::new();
                loop {
                    match text.get(pos) {
                        None => {
                            return Err(
                                "unterminated quoted string".to_owned()
                            )
                        },
                        Some(b'"') => {
                            pos += 1;
                            break;
                        },
                        Some(b'\\') => {
                            match text.get(pos + 1) {
                                Some(&c @ b'"') | Some(&c @ b'\\') => {
                                    content.push(c);
                                    pos += 2;
                                },
                                _ => {
                                    return Err(
                                        "bad quoted-string escape".to_owned()
                                    )
                                },
                            }
                        },
                        Some(&c) => {
                            content.push(c);
                            pos += 1;
                        },
                    }
                }
                tokens.push(Token::Quoted(
                    String::from_utf8_lossy(&content).into_owned(),
                ));
            },
            _ => {
                let start = pos;
                while pos < text.len()
                    && !matches!(text[pos], b' ' | b'(' | b')' | b'"')
                {
                    pos += 1;
                }
                tokens.push(Token::Atom(
                    String::from_utf8_lossy(&text[start..pos]).into_owned(),
                ));
            },
        }
    }

    Ok(())
}

/// A sequence-set component bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqNum {
    Num(u32),
    /// `*`, the highest number in use.
    Star,
}

impl SeqNum {
    fn resolve(self, max: u32) -> u32 {
        match self {
            SeqNum::Num(n) => n,
            SeqNum::Star => max,
        }
    }
}

/// A comma-separated set of numbers and ranges.
#[derive(Clone, Debug, PartialEq)]
pub struct SeqSet(pub Vec<(SeqNum, SeqNum)>);

impl SeqSet {
    pub fn parse(s: &str) -> Result<SeqSet, String> {
        let mut ranges = Vec::new();
        for item in s.split(',') {
            let mut bounds = item.splitn(2, ':');
            let lo = parse_seq_num(bounds.next().unwrap_or(""))?;
            let hi = match bounds.next() {
                Some(hi) => parse_seq_num(hi)?,
                None => lo,
            };
            ranges.push((lo, hi));
        }
        if ranges.is_empty() {
            return Err("empty sequence set".to_owned());
        }
        Ok(SeqSet(ranges))
    }

    /// Whether `value` is in the set, with `*` meaning `max`.
    ///
    /// A range is unordered: `*:4` with a smaller maximum still covers the
    /// maximum.
    pub fn contains(&self, value: u32, max: u32) -> bool {
        self.0.iter().any(|&(a, b)| {
            let a = a.resolve(max);
            let b = b.resolve(max);
            value >= a.min(b) && value <= a.max(b)
        })
    }
}

fn parse_seq_num(s: &str) -> Result<SeqNum, String> {
    if "*" == s {
        return Ok(SeqNum::Star);
    }
    s.parse::<u32>()
        .ok()
        .filter(|&n| n > 0)
        .map(SeqNum::Num)
        .ok_or_else(|| format!("bad sequence number: {:?}", s))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    Full,
    Header,
    Text,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FetchAtt {
    Uid,
    Flags,
    InternalDate,
    Rfc822Size,
    Envelope,
    Body,
    BodyStructure,
    BodySection { section: Section, peek: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreMode {
    Replace,
    Add,
    Remove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusItem {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
    HighestModseq,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SearchKey {
    All,
    Answered,
    Unanswered,
    Deleted,
    Undeleted,
    Flagged,
    Unflagged,
    Seen,
    Unseen,
    New,
    Old,
    Recent,
    Draft,
    Undraft,
    From(String),
    To(String),
    Cc(String),
    Bcc(String),
    Subject(String),
    Body(String),
    Text(String),
    Header(String, String),
    Larger(u64),
    Smaller(u64),
    Uid(SeqSet),
    SeqNums(SeqSet),
    Before(NaiveDate),
    On(NaiveDate),
    Since(NaiveDate),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Capability,
    Noop,
    Check,
    Logout,
    StartTls,
    Namespace,
    Idle,
    Close,
    Unselect,
    Expunge,
    Login {
        user: String,
        password: String,
    },
    List {
        reference: String,
        pattern: String,
    },
    Lsub {
        reference: String,
        pattern: String,
    },
    Select(String),
    Examine(String),
    Create(String),
    Delete(String),
    Rename {
        from: String,
        to: String,
    },
    Subscribe(String),
    Unsubscribe(String),
    Status {
        mailbox: String,
        items: Vec<StatusItem>,
    },
    Append {
        mailbox: String,
        flags: Vec<Flag>,
        date: Option<DateTime<FixedOffset>>,
        message: Vec<u8>,
    },
    Fetch {
        set: SeqSet,
        items: Vec<FetchAtt>,
        uid: bool,
    },
    Store {
        set: SeqSet,
        mode: StoreMode,
        silent: bool,
        flags: Vec<Flag>,
        uid: bool,
    },
    Copy {
        set: SeqSet,
        mailbox: String,
        uid: bool,
    },
    Move {
        set: SeqSet,
        mailbox: String,
        uid: bool,
    },
    Search {
        keys: Vec<SearchKey>,
        uid: bool,
    },
    GetQuotaRoot(String),
    GetQuota(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommandLine {
    pub tag: String,
    pub cmd: Command,
}

pub fn parse_command(tokens: Vec<Token>) -> Result<CommandLine, String> {
    let mut cur = Cursor { tokens, pos: 0 };

    let tag = match cur.next() {
        Some(Token::Atom(tag)) if !tag.contains('*') => tag,
        _ => return Err("missing or malformed tag".to_owned()),
    };

    let cmd = command(&mut cur)?;
    cur.expect_end()?;

    Ok(CommandLine { tag, cmd })
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect_end(&self) -> Result<(), String> {
        if self.at_end() {
            Ok(())
        } else {
            Err("trailing arguments".to_owned())
        }
    }

    fn atom(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Atom(a)) => Ok(a),
            other => Err(format!("expected atom, got {:?}", other)),
        }
    }

    /// An atom, quoted string, or literal.
    fn astring(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Atom(a)) => Ok(a),
            Some(Token::Quoted(q)) => Ok(q),
            Some(Token::Literal(l)) => {
                Ok(String::from_utf8_lossy(&l).into_owned())
            },
            other => Err(format!("expected string, got {:?}", other)),
        }
    }

    fn number(&mut self) -> Result<u64, String> {
        let atom = self.atom()?;
        atom.parse::<u64>()
            .map_err(|_| format!("expected number, got {:?}", atom))
    }

    fn literal(&mut self) -> Result<Vec<u8>, String> {
        match self.next() {
            Some(Token::Literal(l)) => Ok(l),
            other => Err(format!("expected literal, got {:?}", other)),
        }
    }

    fn eat_lparen(&mut self) -> bool {
        if let Some(Token::LParen) = self.peek() {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_rparen(&mut self) -> bool {
        if let Some(Token::RParen) = self.peek() {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// A mailbox name; the INBOX alias is case-insensitive.
    fn mailbox(&mut self) -> Result<String, String> {
        let name = self.astring()?;
        if name.eq_ignore_ascii_case("INBOX") {
            Ok("INBOX".to_owned())
        } else {
            Ok(name)
        }
    }

    fn seq_set(&mut self) -> Result<SeqSet, String> {
        SeqSet::parse(&self.atom()?)
    }
}

fn command(cur: &mut Cursor) -> Result<Command, String> {
    let name = cur.atom()?.to_uppercase();

    match name.as_str() {
        "CAPABILITY" => Ok(Command::Capability),
        "NOOP" => Ok(Command::Noop),
        "CHECK" => Ok(Command::Check),
        "LOGOUT" => Ok(Command::Logout),
        "STARTTLS" => Ok(Command::StartTls),
        "NAMESPACE" => Ok(Command::Namespace),
        "IDLE" => Ok(Command::Idle),
        "CLOSE" => Ok(Command::Close),
        "UNSELECT" => Ok(Command::Unselect),
        "EXPUNGE" => Ok(Command::Expunge),

        "LOGIN" => Ok(Command::Login {
            user: cur.astring()?,
            password: cur.astring()?,
        }),

        "LIST" => Ok(Command::List {
            reference: cur.astring()?,
            pattern: cur.astring()?,
        }),
        "LSUB" => Ok(Command::Lsub {
            reference: cur.astring()?,
            pattern: cur.astring()?,
        }),

        "SELECT" => Ok(Command::Select(cur.mailbox()?)),
        "EXAMINE" => Ok(Command::Examine(cur.mailbox()?)),
        "CREATE" => Ok(Command::Create(cur.mailbox()?)),
        "DELETE" => Ok(Command::Delete(cur.mailbox()?)),
        "RENAME" => Ok(Command::Rename {
            from: cur.mailbox()?,
            to: cur.mailbox()?,
        }),
        "SUBSCRIBE" => Ok(Command::Subscribe(cur.mailbox()?)),
        "UNSUBSCRIBE" => Ok(Command::Unsubscribe(cur.mailbox()?)),

        "STATUS" => {
            let mailbox = cur.mailbox()?;
            if !cur.eat_lparen() {
                return Err("STATUS items must be parenthesised".to_owned());
            }
            let mut items = Vec::new();
            while !cur.eat_rparen() {
                items.push(status_item(&cur.atom()?)?);
            }
            if items.is_empty() {
                return Err("STATUS needs at least one item".to_owned());
            }
            Ok(Command::Status { mailbox, items })
        },

        "APPEND" => {
            let mailbox = cur.mailbox()?;
            let mut flags = Vec::new();
            if cur.eat_lparen() {
                while !cur.eat_rparen() {
                    flags.push(flag(&cur.atom()?)?);
                }
            }

            let mut date = None;
            if let Some(Token::Quoted(q)) = cur.peek() {
                date = Some(parse_wire_datetime(q)?);
                cur.next();
            }

            Ok(Command::Append {
                mailbox,
                flags,
                date,
                message: cur.literal()?,
            })
        },

        "FETCH" | "STORE" | "COPY" | "MOVE" | "SEARCH" => {
            data_command(cur, &name, false)
        },

        "UID" => {
            let sub = cur.atom()?.to_uppercase();
            match sub.as_str() {
                "FETCH" | "STORE" | "COPY" | "MOVE" | "SEARCH" => {
                    data_command(cur, &sub, true)
                },
                _ => Err(format!("UID {} is not a command", sub)),
            }
        },

        "GETQUOTAROOT" => Ok(Command::GetQuotaRoot(cur.mailbox()?)),
        "GETQUOTA" => Ok(Command::GetQuota(cur.astring()?)),

        _ => Err(format!("unknown command {:?}", name)),
    }
}

fn data_command(
    cur: &mut Cursor,
    name: &str,
    uid: bool,
) -> Result<Command, String> {
    match name {
        "FETCH" => {
            let set = cur.seq_set()?;
            let mut items = Vec::new();
            if cur.eat_lparen() {
                while !cur.eat_rparen() {
                    fetch_att(&cur.atom()?, &mut items)?;
                }
            } else {
                fetch_att(&cur.atom()?, &mut items)?;
            }

            // UID FETCH always reports the UID
            if uid && !items.contains(&FetchAtt::Uid) {
                items.insert(0, FetchAtt::Uid);
            }

            Ok(Command::Fetch { set, items, uid })
        },

        "STORE" => {
            let set = cur.seq_set()?;
            let verb = cur.atom()?.to_uppercase();
            let (mode_str, silent) = match verb.strip_suffix(".SILENT") {
                Some(prefix) => (prefix.to_owned(), true),
                None => (verb, false),
            };
            let mode = match mode_str.as_str() {
                "FLAGS" => StoreMode::Replace,
                "+FLAGS" => StoreMode::Add,
                "-FLAGS" => StoreMode::Remove,
                _ => {
                    return Err(format!(
                        "bad STORE operation {:?}",
                        mode_str
                    ))
                },
            };

            let mut flags = Vec::new();
            if cur.eat_lparen() {
                while !cur.eat_rparen() {
                    flags.push(flag(&cur.atom()?)?);
                }
            } else {
                while !cur.at_end() {
                    flags.push(flag(&cur.atom()?)?);
                }
            }

            Ok(Command::Store {
                set,
                mode,
                silent,
                flags,
                uid,
            })
        },

        "COPY" => Ok(Command::Copy {
            set: cur.seq_set()?,
            mailbox: cur.mailbox()?,
            uid,
        }),

        "MOVE" => Ok(Command::Move {
            set: cur.seq_set()?,
            mailbox: cur.mailbox()?,
            uid,
        }),

        "SEARCH" => {
            let mut keys = Vec::new();
            while !cur.at_end() {
                keys.push(search_key(cur)?);
            }
            if keys.is_empty() {
                return Err("SEARCH needs at least one key".to_owned());
            }
            Ok(Command::Search { keys, uid })
        },

        _ => unreachable!(),
    }
}

fn fetch_att(name: &str, items: &mut Vec<FetchAtt>) -> Result<(), String> {
    let upper = name.to_uppercase();

    match upper.as_str() {
        "UID" => items.push(FetchAtt::Uid),
        "FLAGS" => items.push(FetchAtt::Flags),
        "INTERNALDATE" => items.push(FetchAtt::InternalDate),
        "RFC822.SIZE" => items.push(FetchAtt::Rfc822Size),
        "ENVELOPE" => items.push(FetchAtt::Envelope),
        "BODY" => items.push(FetchAtt::Body),
        "BODYSTRUCTURE" => items.push(FetchAtt::BodyStructure),
        "RFC822" => items.push(FetchAtt::BodySection {
            section: Section::Full,
            peek: false,
        }),
        "RFC822.HEADER" => items.push(FetchAtt::BodySection {
            section: Section::Header,
            peek: true,
        }),
        "RFC822.TEXT" => items.push(FetchAtt::BodySection {
            section: Section::Text,
            peek: false,
        }),

        // Macros
        "ALL" => {
            items.extend([
                FetchAtt::Flags,
                FetchAtt::InternalDate,
                FetchAtt::Rfc822Size,
                FetchAtt::Envelope,
            ]);
        },
        "FAST" => {
            items.extend([
                FetchAtt::Flags,
                FetchAtt::InternalDate,
                FetchAtt::Rfc822Size,
            ]);
        },
        "FULL" => {
            items.extend([
                FetchAtt::Flags,
                FetchAtt::InternalDate,
                FetchAtt::Rfc822Size,
                FetchAtt::Envelope,
                FetchAtt::Body,
            ]);
        },

        _ => {
            let (base, peek) = if let Some(rest) =
                strip_prefix_ci(&upper, "BODY.PEEK[")
            {
                (rest, true)
            } else if let Some(rest) = strip_prefix_ci(&upper, "BODY[") {
                (rest, false)
            } else {
                return Err(format!("unknown FETCH item {:?}", name));
            };

            let section = match base.strip_suffix(']') {
                Some("") => Section::Full,
                Some("HEADER") => Section::Header,
                Some("TEXT") => Section::Text,
                _ => {
                    return Err(format!(
                        "unsupported FETCH section {:?}",
                        name
                    ))
                },
            };

            items.push(FetchAtt::BodySection { section, peek });
        },
    }

    Ok(())
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn status_item(name: &str) -> Result<StatusItem, String> {
    match name.to_uppercase().as_str() {
        "MESSAGES" => Ok(StatusItem::Messages),
        "RECENT" => Ok(StatusItem::Recent),
        "UIDNEXT" => Ok(StatusItem::UidNext),
        "UIDVALIDITY" => Ok(StatusItem::UidValidity),
        "UNSEEN" => Ok(StatusItem::Unseen),
        "HIGHESTMODSEQ" => Ok(StatusItem::HighestModseq),
        _ => Err(format!("unknown STATUS item {:?}", name)),
    }
}

fn flag(name: &str) -> Result<Flag, String> {
    name.parse::<Flag>()
        .map_err(|_| format!("unknown flag {:?}", name))
}

fn search_key(cur: &mut Cursor) -> Result<SearchKey, String> {
    let word = cur.astring()?;
    let upper = word.to_uppercase();

    Ok(match upper.as_str() {
        "ALL" => SearchKey::All,
        "ANSWERED" => SearchKey::Answered,
        "UNANSWERED" => SearchKey::Unanswered,
        "DELETED" => SearchKey::Deleted,
        "UNDELETED" => SearchKey::Undeleted,
        "FLAGGED" => SearchKey::Flagged,
        "UNFLAGGED" => SearchKey::Unflagged,
        "SEEN" => SearchKey::Seen,
        "UNSEEN" => SearchKey::Unseen,
        "NEW" => SearchKey::New,
        "OLD" => SearchKey::Old,
        "RECENT" => SearchKey::Recent,
        "DRAFT" => SearchKey::Draft,
        "UNDRAFT" => SearchKey::Undraft,
        "FROM" => SearchKey::From(cur.astring()?),
        "TO" => SearchKey::To(cur.astring()?),
        "CC" => SearchKey::Cc(cur.astring()?),
        "BCC" => SearchKey::Bcc(cur.astring()?),
        "SUBJECT" => SearchKey::Subject(cur.astring()?),
        "BODY" => SearchKey::Body(cur.astring()?),
        "TEXT" => SearchKey::Text(cur.astring()?),
        "HEADER" => SearchKey::Header(cur.astring()?, cur.astring()?),
        "LARGER" => SearchKey::Larger(cur.number()?),
        "SMALLER" => SearchKey::Smaller(cur.number()?),
        "UID" => SearchKey::Uid(cur.seq_set()?),
        "BEFORE" => SearchKey::Before(search_date(&cur.astring()?)?),
        "ON" => SearchKey::On(search_date(&cur.astring()?)?),
        "SINCE" => SearchKey::Since(search_date(&cur.astring()?)?),
        _ => {
            // A bare sequence set is also a valid key
            SearchKey::SeqNums(SeqSet::parse(&word)?)
        },
    })
}

fn search_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%d-%b-%Y")
        .map_err(|_| format!("bad date {:?}", s))
}

/// The INTERNALDATE wire format, e.g. `" 1-Feb-2026 21:52:03 -0500"`.
fn parse_wire_datetime(s: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_str(s.trim(), "%d-%b-%Y %H:%M:%S %z")
        .map_err(|_| format!("bad date-time {:?}", s))
}
