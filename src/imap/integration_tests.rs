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

//! End-to-end protocol tests: a real `Server` over an in-memory stream,
//! with the test playing the client.

use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::thread;

use chrono::prelude::*;

use super::server::Server;
use super::session::CommandProcessor;
use crate::store::blob::{BlobStore, MemoryBlobStore};
use crate::store::memory::MemoryStore;
use crate::store::model::UserId;
use crate::store::Store;
use crate::support::duplex::{self, DuplexStream};
use crate::support::ids::{
    ArcClock, ArcIdSource, FixedClock, SequentialIdSource,
};
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::SystemConfig;

struct TestSession {
    client: BufReader<DuplexStream>,
    store: Arc<MemoryStore>,
    user_id: UserId,
    join: Option<thread::JoinHandle<()>>,
}

impl TestSession {
    fn new() -> Self {
        crate::init_test_log();

        let clock: ArcClock =
            Arc::new(FixedClock(Utc.timestamp(1_700_000_000, 0)));
        let ids: ArcIdSource = Arc::new(SequentialIdSource::default());
        let store = Arc::new(MemoryStore::new(
            Arc::clone(&clock),
            Arc::clone(&ids),
        ));
        let user = store
            .create_user("alice", "pw", "alice@localhost")
            .unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

        let processor = CommandProcessor::new(
            LogPrefix::new("imap", "test".to_owned()),
            Arc::new(SystemConfig::default()),
            Arc::clone(&store) as Arc<dyn Store>,
            blobs,
            clock,
            ids,
        );

        let (server_end, client_end) = duplex::pair();
        let join = thread::spawn(move || {
            let mut server =
                Server::new(Box::new(server_end), processor, None);
            let _ = server.run();
        });

        let mut session = TestSession {
            client: BufReader::new(client_end),
            store,
            user_id: user.id,
            join: Some(join),
        };

        assert_eq!("* OK IMAP4rev1 Server Ready", session.read_line());
        session
    }

    fn send(&mut self, raw: &str) {
        self.client
            .get_mut()
            .write_all(raw.as_bytes())
            .expect("write to server failed");
    }

    fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.client.read_line(&mut line).expect("read failed");
        line.trim_end_matches(['\r', '\n'].as_ref()).to_owned()
    }

    /// Sends a full command line and reads until its tagged completion.
    fn cmd(&mut self, line: &str) -> Vec<String> {
        let tag = line.split(' ').next().expect("untagged command");
        self.send(&format!("{}\r\n", line));
        self.read_until_tagged(tag)
    }

    fn read_until_tagged(&mut self, tag: &str) -> Vec<String> {
        let prefix = format!("{} ", tag);
        let mut lines = Vec::new();
        loop {
            let line = self.read_line();
            let done = line.starts_with(&prefix);
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    fn login_and_select(&mut self) {
        assert_tagged_ok(&self.cmd("L1 LOGIN alice pw"));
        assert_tagged_ok(&self.cmd("L2 SELECT INBOX"));
    }

    fn append(&mut self, tag: &str, mailbox: &str, message: &str) -> Vec<String> {
        self.send(&format!(
            "{} APPEND {} {{{}+}}\r\n{}\r\n",
            tag,
            mailbox,
            message.len(),
            message
        ));
        self.read_until_tagged(tag)
    }
}

impl Drop for TestSession {
    fn drop(&mut self) {
        let _ = self.client.get_mut().write_all(b"ZZ LOGOUT\r\n");
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn assert_tagged_ok(lines: &[String]) {
    let last = lines.last().expect("no response lines");
    assert!(
        last.split(' ').nth(1) == Some("OK"),
        "expected tagged OK, got {:?}",
        lines
    );
}

fn find_line<'a>(lines: &'a [String], needle: &str) -> Option<&'a String> {
    lines.iter().find(|l| l.contains(needle))
}

const SIMPLE_MESSAGE: &str =
    "From: a@x\r\nTo: b@x\r\nSubject: hi\r\n\r\nbody\r\n";

#[test]
fn greeting_capability_and_login() {
    let mut s = TestSession::new();

    let lines = s.cmd("A1 CAPABILITY");
    let caps = find_line(&lines, "* CAPABILITY").unwrap();
    for cap in &[
        "IMAP4rev1", "LITERAL+", "IDLE", "NAMESPACE", "UIDPLUS", "QUOTA",
        "LIST-EXTENDED", "CHILDREN", "UNSELECT", "MOVE",
    ] {
        assert!(caps.contains(cap), "missing {} in {}", cap, caps);
    }
    // No TLS configured, so no STARTTLS offer
    assert!(!caps.contains("STARTTLS"));

    let lines = s.cmd("A2 LOGIN alice wrong");
    assert!(lines.last().unwrap().starts_with("A2 NO"));

    // An unknown user gets the same reply as a wrong password
    let lines = s.cmd("A2b LOGIN mallory wrong");
    assert!(lines.last().unwrap().ends_with("Bad user name or password"));

    assert_tagged_ok(&s.cmd("A3 LOGIN alice pw"));

    // Commands before authentication are rejected
    let mut s2 = TestSession::new();
    let lines = s2.cmd("B1 SELECT INBOX");
    assert!(lines.last().unwrap().starts_with("B1 BAD"));
}

#[test]
fn login_with_synchronising_literal() {
    let mut s = TestSession::new();

    s.send("A1 LOGIN {5}\r\n");
    assert!(s.read_line().starts_with("+ "));
    s.send("alice \"pw\"\r\n");
    let lines = s.read_until_tagged("A1");
    assert_tagged_ok(&lines);
}

#[test]
fn select_responses() {
    let mut s = TestSession::new();
    assert_tagged_ok(&s.cmd("A1 LOGIN alice pw"));

    let lines = s.cmd("A2 SELECT INBOX");
    assert!(find_line(&lines, "* 0 EXISTS").is_some(), "{:?}", lines);
    assert!(find_line(&lines, "* 0 RECENT").is_some());
    assert!(find_line(&lines, "* FLAGS (").is_some());
    assert!(find_line(&lines, "[PERMANENTFLAGS").is_some());
    assert!(find_line(&lines, "[UIDNEXT 1]").is_some());
    assert!(find_line(&lines, "[UIDVALIDITY").is_some());
    assert!(lines.last().unwrap().contains("[READ-WRITE]"));

    let lines = s.cmd("A3 EXAMINE INBOX");
    assert!(lines.last().unwrap().contains("[READ-ONLY]"));

    let lines = s.cmd("A4 SELECT Nonexistent");
    assert!(lines.last().unwrap().contains("[NONEXISTENT]"));
}

// Spec scenario S1: APPEND then FETCH.
#[test]
fn append_then_fetch() {
    let mut s = TestSession::new();
    s.login_and_select();

    let lines = s.append("A3", "INBOX", SIMPLE_MESSAGE);
    let tagged = lines.last().unwrap();
    assert!(
        tagged.contains("[APPENDUID") && tagged.contains(" 1]"),
        "{:?}",
        tagged
    );

    let lines = s.cmd("A4 UID FETCH 1 (UID RFC822.SIZE ENVELOPE)");
    assert_tagged_ok(&lines);
    let fetch = find_line(&lines, "FETCH (").unwrap();
    assert!(fetch.starts_with("* 1 FETCH ("), "{}", fetch);
    assert!(fetch.contains("UID 1"), "{}", fetch);
    assert!(
        fetch.contains(&format!("RFC822.SIZE {}", SIMPLE_MESSAGE.len())),
        "{}",
        fetch
    );
    assert!(fetch.contains("\"hi\""), "{}", fetch);
}

// Spec scenario S2: STORE with .SILENT suppresses the untagged FETCH.
#[test]
fn store_flags_silent() {
    let mut s = TestSession::new();
    s.login_and_select();
    s.append("A3", "INBOX", SIMPLE_MESSAGE);
    // Bring the new message into the session's view
    s.cmd("A4 NOOP");

    let lines = s.cmd("A5 UID STORE 1 +FLAGS.SILENT (\\Seen)");
    assert_tagged_ok(&lines);
    assert!(
        find_line(&lines, "FETCH").is_none(),
        "silent store leaked a FETCH: {:?}",
        lines
    );

    let lines = s.cmd("A6 UID FETCH 1 FLAGS");
    let fetch = find_line(&lines, "FETCH (").unwrap();
    assert!(fetch.contains("FLAGS (\\Seen"), "{}", fetch);

    // Without .SILENT the new flag set is reported
    let lines = s.cmd("A7 UID STORE 1 -FLAGS (\\Seen)");
    let fetch = find_line(&lines, "FETCH (").unwrap();
    assert!(fetch.contains("FLAGS ("), "{}", fetch);
    assert!(!fetch.contains("\\Seen"), "{}", fetch);
}

// Spec scenario S3: MOVE allocates a fresh UID and expunges the source.
#[test]
fn move_to_other_mailbox() {
    let mut s = TestSession::new();
    s.login_and_select();
    s.append("A3", "INBOX", SIMPLE_MESSAGE);
    s.cmd("A4 NOOP");

    assert_tagged_ok(&s.cmd("A7 CREATE Archive"));
    let lines = s.cmd("A8 UID MOVE 1 Archive");
    assert!(find_line(&lines, "* 1 EXPUNGE").is_some(), "{:?}", lines);
    let tagged = lines.last().unwrap();
    assert!(tagged.contains("[COPYUID"), "{}", tagged);
    assert!(tagged.contains(" 1 1]"), "{}", tagged);

    let lines = s.cmd("A9 UID FETCH 1:* FLAGS");
    assert!(
        find_line(&lines, "FETCH (").is_none(),
        "source still has messages: {:?}",
        lines
    );

    let lines = s.cmd("A10 SELECT Archive");
    assert!(find_line(&lines, "* 1 EXISTS").is_some(), "{:?}", lines);

    let lines = s.cmd("A11 UID FETCH 1 (UID)");
    assert!(find_line(&lines, "* 1 FETCH (UID 1)").is_some(), "{:?}", lines);
}

// Spec scenario S6: nested multipart BODYSTRUCTURE.
#[test]
fn nested_multipart_bodystructure() {
    let message = "\
Content-Type: multipart/mixed; boundary=outer\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=inner\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain text\r\n\
--inner\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>html</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERg==\r\n\
--outer--\r\n";

    let mut s = TestSession::new();
    s.login_and_select();
    s.append("A3", "INBOX", message);
    s.cmd("A4 NOOP");

    let lines = s.cmd("A5 FETCH 1 BODYSTRUCTURE");
    let fetch = find_line(&lines, "BODYSTRUCTURE").unwrap();
    assert!(fetch.contains("\"MIXED\""), "{}", fetch);
    assert!(fetch.contains("\"ALTERNATIVE\""), "{}", fetch);
    assert!(
        fetch.contains("\"APPLICATION\" \"PDF\" NIL NIL NIL \"BASE64\" 8"),
        "{}",
        fetch
    );
}

#[test]
fn fetch_body_sets_seen_but_peek_does_not() {
    let mut s = TestSession::new();
    s.login_and_select();
    s.append("A3", "INBOX", SIMPLE_MESSAGE);
    s.cmd("A4 NOOP");

    let lines = s.cmd("A5 UID FETCH 1 BODY.PEEK[]");
    assert_tagged_ok(&lines);
    let lines = s.cmd("A6 UID FETCH 1 FLAGS");
    let fetch = find_line(&lines, "FLAGS").unwrap();
    assert!(!fetch.contains("\\Seen"), "PEEK set \\Seen: {}", fetch);

    let lines = s.cmd("A7 UID FETCH 1 BODY[]");
    assert_tagged_ok(&lines);
    // The implicit flag change is reported alongside the content
    assert!(
        find_line(&lines, "\\Seen").is_some(),
        "implicit \\Seen not reported: {:?}",
        lines
    );

    let lines = s.cmd("A8 UID FETCH 1 FLAGS");
    let fetch = find_line(&lines, "FLAGS").unwrap();
    assert!(fetch.contains("\\Seen"), "{}", fetch);
}

#[test]
fn fetch_body_sections_round_trip() {
    let mut s = TestSession::new();
    s.login_and_select();
    s.append("A3", "INBOX", SIMPLE_MESSAGE);
    s.cmd("A4 NOOP");

    // BODY[] returns the literal octets of the whole message
    s.send("A5 UID FETCH 1 BODY.PEEK[]\r\n");
    let line = s.read_line();
    assert!(line.contains("BODY[] {"), "{}", line);
    let size: usize = line
        .split('{')
        .nth(1)
        .unwrap()
        .trim_end_matches('}')
        .parse()
        .unwrap();
    let mut body = vec![0u8; size];
    std::io::Read::read_exact(&mut s.client, &mut body).unwrap();
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("Subject: hi"), "{}", body);
    assert!(body.contains("body"), "{}", body);
    s.read_until_tagged("A5");

    let lines = s.cmd("A6 UID FETCH 1 BODY.PEEK[HEADER]");
    assert_tagged_ok(&lines);

    let lines = s.cmd("A7 UID FETCH 1 BODY.PEEK[TEXT]");
    assert_tagged_ok(&lines);
}

#[test]
fn expunge_renumbers_ascending() {
    let mut s = TestSession::new();
    s.login_and_select();
    for tag in &["A3", "A4", "A5"] {
        s.append(tag, "INBOX", SIMPLE_MESSAGE);
    }
    s.cmd("A6 NOOP");

    assert_tagged_ok(&s.cmd("A7 UID STORE 1,3 +FLAGS.SILENT (\\Deleted)"));
    let lines = s.cmd("A8 EXPUNGE");
    let expunges: Vec<&String> =
        lines.iter().filter(|l| l.contains("EXPUNGE")).collect();
    assert_eq!(
        vec!["* 1 EXPUNGE", "* 2 EXPUNGE"],
        expunges.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "{:?}",
        lines
    );

    let lines = s.cmd("A9 FETCH 1:* (UID)");
    let fetch = find_line(&lines, "FETCH").unwrap();
    assert!(fetch.contains("UID 2"), "{}", fetch);
}

#[test]
fn search_keys_work() {
    let mut s = TestSession::new();
    s.login_and_select();
    s.append("A3", "INBOX", SIMPLE_MESSAGE);
    s.append(
        "A4",
        "INBOX",
        "From: other@y\r\nSubject: totally different\r\n\r\nxyzzy\r\n",
    );
    s.cmd("A5 NOOP");

    let lines = s.cmd("A6 SEARCH SUBJECT hi");
    assert!(find_line(&lines, "* SEARCH 1").is_some(), "{:?}", lines);

    let lines = s.cmd("A7 SEARCH FROM other");
    assert!(find_line(&lines, "* SEARCH 2").is_some(), "{:?}", lines);

    let lines = s.cmd("A8 SEARCH BODY xyzzy");
    assert!(find_line(&lines, "* SEARCH 2").is_some(), "{:?}", lines);

    let lines = s.cmd("A9 SEARCH HEADER To b@x");
    assert!(find_line(&lines, "* SEARCH 1").is_some(), "{:?}", lines);

    let lines = s.cmd("A10 UID SEARCH ALL");
    assert!(find_line(&lines, "* SEARCH 1 2").is_some(), "{:?}", lines);

    let lines = s.cmd("A11 SEARCH UNSEEN LARGER 10");
    assert!(find_line(&lines, "* SEARCH 1 2").is_some(), "{:?}", lines);
}

#[test]
fn list_and_status() {
    let mut s = TestSession::new();
    assert_tagged_ok(&s.cmd("A1 LOGIN alice pw"));
    assert_tagged_ok(&s.cmd("A2 CREATE Work"));
    assert_tagged_ok(&s.cmd("A3 CREATE Work/2026"));

    let lines = s.cmd("A4 LIST \"\" *");
    assert!(find_line(&lines, "INBOX").is_some());
    let work = find_line(&lines, "\\HasChildren) \"/\" Work").unwrap();
    assert!(work.starts_with("* LIST"), "{}", work);
    assert!(find_line(&lines, "Work/2026").is_some());
    assert!(find_line(&lines, "\\Junk").is_some());

    let lines = s.cmd("A5 LIST \"\" %");
    assert!(find_line(&lines, "Work/2026").is_none(), "{:?}", lines);

    // LSUB honours subscriptions
    assert_tagged_ok(&s.cmd("A6 UNSUBSCRIBE Work"));
    let lines = s.cmd("A7 LSUB \"\" *");
    assert!(
        find_line(&lines, "\"/\" Work/2026").is_some(),
        "{:?}",
        lines
    );
    assert!(
        lines.iter().all(|l| !l.ends_with("\"/\" Work")),
        "{:?}",
        lines
    );

    let lines = s.cmd("A8 STATUS INBOX (MESSAGES UNSEEN UIDNEXT)");
    assert!(
        find_line(&lines, "* STATUS INBOX (MESSAGES 0 UNSEEN 0 UIDNEXT 1)")
            .is_some(),
        "{:?}",
        lines
    );

    // Paths with doubled separators are rejected
    let lines = s.cmd("A9 CREATE bad//path");
    assert!(lines.last().unwrap().starts_with("A9 NO"), "{:?}", lines);

    // Special-use mailboxes cannot be deleted
    let lines = s.cmd("A10 DELETE Junk");
    assert!(lines.last().unwrap().contains("[CANNOT]"), "{:?}", lines);
}

#[test]
fn idle_reports_new_mail_on_done() {
    let mut s = TestSession::new();
    s.login_and_select();

    s.send("I1 IDLE\r\n");
    assert!(s.read_line().starts_with("+ "), "no idle continuation");

    // Mail arrives while the session is idling
    let inbox = s
        .store
        .find_mailbox(&s.user_id, "INBOX")
        .unwrap()
        .unwrap();
    let uid = s.store.allocate_uid(&inbox.id).unwrap();
    let tree = crate::mime::parser::parse(SIMPLE_MESSAGE.as_bytes());
    let message = crate::index::build_message(
        "feedfeedfeedfeedfeedfeed".to_owned(),
        s.user_id.clone(),
        inbox.id.clone(),
        uid,
        SIMPLE_MESSAGE.len() as u64,
        Utc.timestamp(1_700_000_100, 0),
        tree,
        Default::default(),
    );
    s.store.insert_message(message).unwrap();

    s.send("DONE\r\n");
    let lines = s.read_until_tagged("I1");
    assert!(find_line(&lines, "* 1 EXISTS").is_some(), "{:?}", lines);
    assert_tagged_ok(&lines);
}

#[test]
fn close_expunges_silently_and_unselect_does_not() {
    let mut s = TestSession::new();
    s.login_and_select();
    s.append("A3", "INBOX", SIMPLE_MESSAGE);
    s.cmd("A4 NOOP");
    assert_tagged_ok(&s.cmd("A5 STORE 1 +FLAGS.SILENT (\\Deleted)"));

    let lines = s.cmd("A6 CLOSE");
    assert_tagged_ok(&lines);
    assert!(find_line(&lines, "EXPUNGE").is_none(), "{:?}", lines);

    let lines = s.cmd("A7 STATUS INBOX (MESSAGES)");
    assert!(
        find_line(&lines, "(MESSAGES 0)").is_some(),
        "CLOSE did not expunge: {:?}",
        lines
    );

    // UNSELECT leaves \Deleted messages in place
    s.append("B1", "INBOX", SIMPLE_MESSAGE);
    assert_tagged_ok(&s.cmd("B2 SELECT INBOX"));
    assert_tagged_ok(&s.cmd("B3 STORE 1 +FLAGS.SILENT (\\Deleted)"));
    assert_tagged_ok(&s.cmd("B4 UNSELECT"));
    let lines = s.cmd("B5 STATUS INBOX (MESSAGES)");
    assert!(
        find_line(&lines, "(MESSAGES 1)").is_some(),
        "UNSELECT expunged: {:?}",
        lines
    );
}

#[test]
fn copy_preserves_source() {
    let mut s = TestSession::new();
    s.login_and_select();
    s.append("A3", "INBOX", SIMPLE_MESSAGE);
    s.cmd("A4 NOOP");
    assert_tagged_ok(&s.cmd("A5 CREATE Archive"));

    let lines = s.cmd("A6 COPY 1 Archive");
    let tagged = lines.last().unwrap();
    assert!(tagged.contains("[COPYUID"), "{}", tagged);
    assert!(find_line(&lines, "EXPUNGE").is_none(), "{:?}", lines);

    let lines = s.cmd("A7 STATUS Archive (MESSAGES)");
    assert!(find_line(&lines, "(MESSAGES 1)").is_some(), "{:?}", lines);
    let lines = s.cmd("A8 STATUS INBOX (MESSAGES)");
    assert!(find_line(&lines, "(MESSAGES 1)").is_some(), "{:?}", lines);

    // COPY to a missing mailbox suggests creating it
    let lines = s.cmd("A9 COPY 1 Missing");
    assert!(lines.last().unwrap().contains("[TRYCREATE]"), "{:?}", lines);
}

#[test]
fn examine_is_read_only() {
    let mut s = TestSession::new();
    assert_tagged_ok(&s.cmd("A1 LOGIN alice pw"));
    s.append("A2", "INBOX", SIMPLE_MESSAGE);
    assert_tagged_ok(&s.cmd("A3 EXAMINE INBOX"));

    let lines = s.cmd("A4 STORE 1 +FLAGS (\\Seen)");
    assert!(lines.last().unwrap().starts_with("A4 NO"), "{:?}", lines);

    let lines = s.cmd("A5 EXPUNGE");
    assert!(lines.last().unwrap().starts_with("A5 NO"), "{:?}", lines);
}

#[test]
fn bad_commands_keep_session_alive() {
    let mut s = TestSession::new();

    let lines = s.cmd("A1 FROBNICATE");
    assert!(lines.last().unwrap().starts_with("A1 BAD"), "{:?}", lines);

    let lines = s.cmd("A2 LOGIN");
    assert!(lines.last().unwrap().starts_with("A2 BAD"), "{:?}", lines);

    // Still usable afterwards
    assert_tagged_ok(&s.cmd("A3 LOGIN alice pw"));
}

#[test]
fn logout_says_bye() {
    let mut s = TestSession::new();
    let lines = s.cmd("A1 LOGOUT");
    assert!(find_line(&lines, "* BYE").is_some(), "{:?}", lines);
    assert_tagged_ok(&lines);
    if let Some(join) = s.join.take() {
        join.join().unwrap();
    }
}

#[test]
fn getquota_reports_usage() {
    let mut s = TestSession::new();
    s.login_and_select();
    s.append("A3", "INBOX", SIMPLE_MESSAGE);

    let lines = s.cmd("A4 GETQUOTAROOT INBOX");
    assert!(find_line(&lines, "* QUOTAROOT INBOX").is_some(), "{:?}", lines);
    assert!(find_line(&lines, "* QUOTA").is_some(), "{:?}", lines);
    assert_tagged_ok(&lines);
}
