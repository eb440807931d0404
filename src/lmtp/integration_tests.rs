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

//! End-to-end LMTP tests: a real server over an in-memory stream.

use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::thread;

use chrono::prelude::*;

use super::server::Server;
use crate::store::blob::{BlobStore, MemoryBlobStore};
use crate::store::memory::MemoryStore;
use crate::store::model::{
    Filter, FilterAction, FilterQuery, SpecialUse, UserId,
};
use crate::store::{MessagePredicate, Store};
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
        Self::with_config(SystemConfig::default())
    }

    fn with_config(config: SystemConfig) -> Self {
        crate::init_test_log();

        let clock: ArcClock =
            Arc::new(FixedClock(Utc.timestamp(1_700_000_000, 0)));
        let ids: ArcIdSource = Arc::new(SequentialIdSource::default());
        let store = Arc::new(MemoryStore::new(
            Arc::clone(&clock),
            Arc::clone(&ids),
        ));
        let user = store
            .create_user("known", "pw", "known@localhost")
            .unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

        let (server_end, client_end) = duplex::pair();
        let server_store = Arc::clone(&store) as Arc<dyn Store>;
        let join = thread::spawn(move || {
            let mut server = Server::new(
                Box::new(server_end),
                LogPrefix::new("lmtp", "test".to_owned()),
                Arc::new(config),
                server_store,
                blobs,
                clock,
                ids,
            );
            let _ = server.run();
        });

        let mut session = TestSession {
            client: BufReader::new(client_end),
            store,
            user_id: user.id,
            join: Some(join),
        };

        let greeting = session.read_line();
        assert!(greeting.starts_with("220 "), "{}", greeting);
        assert!(
            greeting.contains("Wild Duck LMTP Server"),
            "{}",
            greeting
        );
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

    /// Sends one command and reads one complete (possibly multiline)
    /// reply.
    fn cmd(&mut self, line: &str) -> Vec<String> {
        self.send(&format!("{}\r\n", line));
        self.read_reply()
    }

    fn read_reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line();
            let done = line.len() < 4 || line.as_bytes()[3] == b' ';
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    fn lhlo(&mut self) -> Vec<String> {
        self.cmd("LHLO client.example.com")
    }

    fn inbox_messages(&self) -> Vec<crate::store::model::Message> {
        self.mailbox_messages("INBOX")
    }

    fn mailbox_messages(
        &self,
        path: &str,
    ) -> Vec<crate::store::model::Message> {
        let mailbox = self
            .store
            .find_mailbox(&self.user_id, path)
            .unwrap()
            .unwrap();
        self.store
            .query_messages(&mailbox.id, &MessagePredicate::default())
            .unwrap()
    }
}

impl Drop for TestSession {
    fn drop(&mut self) {
        let _ = self.client.get_mut().write_all(b"QUIT\r\n");
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

const MESSAGE: &str = "From: sender@example.com\r\n\
    To: known@localhost\r\n\
    Subject: delivery test\r\n\
    \r\n\
    message body here\r\n";

fn assert_code(lines: &[String], code: &str) {
    assert!(
        lines.last().map_or(false, |l| l.starts_with(code)),
        "expected {} reply, got {:?}",
        code,
        lines
    );
}

#[test]
fn lhlo_advertises_extensions() {
    let mut s = TestSession::new();
    let lines = s.lhlo();

    for ext in &["PIPELINING", "8BITMIME", "ENHANCEDSTATUSCODES"] {
        assert!(
            lines.iter().any(|l| l.contains(ext)),
            "missing {}: {:?}",
            ext,
            lines
        );
    }
    assert!(
        lines
            .iter()
            .any(|l| l.contains(&format!("SIZE {}", 35 * 1024 * 1024))),
        "{:?}",
        lines
    );
}

#[test]
fn helo_is_rejected_on_lmtp() {
    let mut s = TestSession::new();
    let lines = s.cmd("EHLO client.example.com");
    assert_code(&lines, "500");
    assert!(lines.last().unwrap().contains("LHLO"), "{:?}", lines);
}

#[test]
fn out_of_sequence_commands() {
    let mut s = TestSession::new();
    s.lhlo();

    assert_code(&s.cmd("RCPT TO:<known@localhost>"), "503");
    assert_code(&s.cmd("DATA"), "503");
    assert_code(&s.cmd("MAIL FROM:<a@b>"), "250");
    assert_code(&s.cmd("MAIL FROM:<a@b>"), "503");
}

// Spec scenario S4: two recipients, one unknown; exactly one status line
// per accepted recipient after DATA.
#[test]
fn per_recipient_delivery_status() {
    let mut s = TestSession::new();
    s.lhlo();

    assert_code(&s.cmd("MAIL FROM:<s@x>"), "250");
    assert_code(&s.cmd("RCPT TO:<known@localhost>"), "250");
    let lines = s.cmd("RCPT TO:<nobody@localhost>");
    assert_code(&lines, "550");
    assert!(
        lines.last().unwrap().contains("Unknown recipient"),
        "{:?}",
        lines
    );

    assert_code(&s.cmd("DATA"), "354");
    s.send(MESSAGE);
    s.send(".\r\n");

    // Exactly one reply, for the one accepted recipient
    let reply = s.read_reply();
    assert_code(&reply, "250");
    assert!(
        reply.last().unwrap().contains("<known@localhost> delivered"),
        "{:?}",
        reply
    );

    let messages = s.inbox_messages();
    assert_eq!(1, messages.len());
    let delivered = &messages[0];
    assert!(delivered
        .mime_tree
        .header
        .iter()
        .any(|h| h == "Delivered-To: known@localhost"));
    assert_eq!(
        Some("delivery test"),
        delivered.envelope.subject.as_deref()
    );
    // Size includes the prepended Delivered-To header
    assert_eq!(
        MESSAGE.len() as u64 + "Delivered-To: known@localhost\r\n".len() as u64,
        delivered.size
    );
    assert!(delivered.unseen);
    assert!(delivered.recent);
}

#[test]
fn multiple_recipients_each_get_a_reply() {
    let mut s = TestSession::new();
    s.store.add_address(&s.user_id, "second@localhost").unwrap();
    s.lhlo();

    assert_code(&s.cmd("MAIL FROM:<s@x>"), "250");
    assert_code(&s.cmd("RCPT TO:<known@localhost>"), "250");
    assert_code(&s.cmd("RCPT TO:<second@localhost>"), "250");
    assert_code(&s.cmd("DATA"), "354");
    s.send(MESSAGE);
    s.send(".\r\n");

    let first = s.read_reply();
    assert_code(&first, "250");
    assert!(first.last().unwrap().contains("known@localhost"));
    let second = s.read_reply();
    assert_code(&second, "250");
    assert!(second.last().unwrap().contains("second@localhost"));

    // Both deliveries landed in the same user's INBOX
    assert_eq!(2, s.inbox_messages().len());
}

#[test]
fn plus_addressing_routes_and_preserves_tag() {
    let mut s = TestSession::new();
    s.lhlo();

    assert_code(&s.cmd("MAIL FROM:<s@x>"), "250");
    assert_code(&s.cmd("RCPT TO:<Known+Lists@Localhost>"), "250");
    assert_code(&s.cmd("DATA"), "354");
    s.send(MESSAGE);
    s.send(".\r\n");
    assert_code(&s.read_reply(), "250");

    let messages = s.inbox_messages();
    assert_eq!(1, messages.len());
    // The tag is discarded for routing but preserved in Delivered-To
    assert!(messages[0]
        .mime_tree
        .header
        .iter()
        .any(|h| h == "Delivered-To: known+lists@localhost"));
}

#[test]
fn dot_stuffing_is_reversed() {
    let mut s = TestSession::new();
    s.lhlo();
    assert_code(&s.cmd("MAIL FROM:<s@x>"), "250");
    assert_code(&s.cmd("RCPT TO:<known@localhost>"), "250");
    assert_code(&s.cmd("DATA"), "354");
    s.send(
        "Subject: dots\r\n\r\n..leading dot line\r\nnormal\r\n.\r\n",
    );
    assert_code(&s.read_reply(), "250");

    let messages = s.inbox_messages();
    let body = &messages[0].mime_tree.body;
    assert!(
        body.starts_with(b".leading dot line"),
        "{:?}",
        String::from_utf8_lossy(body)
    );
}

// Spec scenario S5: the configured spam header routes to \Junk.
#[test]
fn spam_header_routes_to_junk() {
    let mut s = TestSession::with_config(SystemConfig {
        lmtp: crate::support::system_config::LmtpConfig {
            spam_header: "X-Spam-Flag".to_owned(),
            ..Default::default()
        },
        ..Default::default()
    });
    s.lhlo();

    assert_code(&s.cmd("MAIL FROM:<s@x>"), "250");
    assert_code(&s.cmd("RCPT TO:<known@localhost>"), "250");
    assert_code(&s.cmd("DATA"), "354");
    s.send(
        "From: spammer@example.com\r\n\
         X-Spam-Flag: YES\r\n\
         Subject: crypto riches\r\n\
         \r\n\
         entirely legitimate\r\n\
         .\r\n",
    );
    assert_code(&s.read_reply(), "250");

    assert_eq!(0, s.inbox_messages().len());
    let junk = s.mailbox_messages("Junk");
    assert_eq!(1, junk.len());
    assert_eq!(
        Some("crypto riches"),
        junk[0].envelope.subject.as_deref()
    );
}

#[test]
fn user_filters_compose() {
    let mut s = TestSession::new();
    s.store.create_mailbox(&s.user_id, "Work", None).unwrap();
    s.store.add_filter(
        &s.user_id,
        Filter {
            id: "to-work".to_owned(),
            query: FilterQuery {
                headers: vec![(
                    "Subject".to_owned(),
                    "report".to_owned(),
                )],
                ..FilterQuery::default()
            },
            action: FilterAction {
                mailbox: Some("Work".to_owned()),
                seen: true,
                ..FilterAction::default()
            },
        },
    );
    s.lhlo();

    assert_code(&s.cmd("MAIL FROM:<boss@example.com>"), "250");
    assert_code(&s.cmd("RCPT TO:<known@localhost>"), "250");
    assert_code(&s.cmd("DATA"), "354");
    s.send(
        "From: boss@example.com\r\nSubject: Quarterly Report\r\n\r\nnumbers\r\n.\r\n",
    );
    assert_code(&s.read_reply(), "250");

    assert_eq!(0, s.inbox_messages().len());
    let work = s.mailbox_messages("Work");
    assert_eq!(1, work.len());
    assert!(!work[0].unseen, "seen action not applied");
}

#[test]
fn delete_filter_discards_but_reports_success() {
    let mut s = TestSession::new();
    s.store.add_filter(
        &s.user_id,
        Filter {
            id: "drop".to_owned(),
            query: FilterQuery {
                text: Some("unsubscribe".to_owned()),
                ..FilterQuery::default()
            },
            action: FilterAction {
                delete: true,
                ..FilterAction::default()
            },
        },
    );
    s.lhlo();

    assert_code(&s.cmd("MAIL FROM:<list@example.com>"), "250");
    assert_code(&s.cmd("RCPT TO:<known@localhost>"), "250");
    assert_code(&s.cmd("DATA"), "354");
    s.send("Subject: ad\r\n\r\nclick to unsubscribe\r\n.\r\n");
    assert_code(&s.read_reply(), "250");

    assert_eq!(0, s.inbox_messages().len());
}

#[test]
fn oversize_message_is_rejected_per_recipient() {
    let mut s = TestSession::with_config(SystemConfig {
        lmtp: crate::support::system_config::LmtpConfig {
            max_size: 100,
            ..Default::default()
        },
        ..Default::default()
    });
    s.lhlo();

    assert_code(&s.cmd("MAIL FROM:<s@x>"), "250");
    assert_code(&s.cmd("RCPT TO:<known@localhost>"), "250");
    assert_code(&s.cmd("DATA"), "354");
    s.send("Subject: big\r\n\r\n");
    for _ in 0..20 {
        s.send("0123456789012345678901234567890123456789\r\n");
    }
    s.send(".\r\n");
    assert_code(&s.read_reply(), "552");

    assert_eq!(0, s.inbox_messages().len());
}

#[test]
fn rset_clears_the_transaction() {
    let mut s = TestSession::new();
    s.lhlo();

    assert_code(&s.cmd("MAIL FROM:<s@x>"), "250");
    assert_code(&s.cmd("RCPT TO:<known@localhost>"), "250");
    assert_code(&s.cmd("RSET"), "250");
    assert_code(&s.cmd("DATA"), "503");

    // A fresh transaction works
    assert_code(&s.cmd("MAIL FROM:<s@x>"), "250");
    assert_code(&s.cmd("RCPT TO:<known@localhost>"), "250");
}

#[test]
fn disabled_user_is_rejected_at_rcpt() {
    let s = TestSession::new();
    s.store.set_disabled(&s.user_id, true);
    let mut s = s;
    s.lhlo();

    assert_code(&s.cmd("MAIL FROM:<s@x>"), "250");
    let lines = s.cmd("RCPT TO:<known@localhost>");
    assert_code(&lines, "550");
    assert!(lines.last().unwrap().contains("disabled"), "{:?}", lines);
}

#[test]
fn uids_increase_across_deliveries() {
    let mut s = TestSession::new();
    s.lhlo();

    for _ in 0..3 {
        assert_code(&s.cmd("MAIL FROM:<s@x>"), "250");
        assert_code(&s.cmd("RCPT TO:<known@localhost>"), "250");
        assert_code(&s.cmd("DATA"), "354");
        s.send(MESSAGE);
        s.send(".\r\n");
        assert_code(&s.read_reply(), "250");
    }

    let messages = s.inbox_messages();
    assert_eq!(3, messages.len());
    assert!(messages.windows(2).all(|w| w[0].uid < w[1].uid));
    assert_eq!(
        vec![1, 2, 3],
        messages.iter().map(|m| m.uid.get()).collect::<Vec<_>>()
    );

    let user = s.store.find_user(&s.user_id).unwrap().unwrap();
    assert!(user.storage_used > 0);
}
